//! Candidate span enumeration.
//!
//! A span is a half-open range of consecutive sentences treated as one
//! alignment unit. The enumerator walks every span of length
//! `1..=max_align_size` whose end stays inside the sequence, ordered by
//! increasing start, then increasing length.

use super::error::{AlignError, Result};

/// A half-open sentence index range `[start, end)` within one sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    /// First sentence index.
    pub start: usize,
    /// One past the last sentence index.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Span { start, end }
    }

    /// The empty span at a given boundary, used for deletion cells.
    pub fn empty_at(pos: usize) -> Self {
        Span { start: pos, end: pos }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Sentence indices covered by this span.
    pub fn indices(&self) -> impl Iterator<Item = usize> {
        self.start..self.end
    }

    /// Joins the covered sentences with single spaces.
    pub fn joined_text(&self, sentences: &[String]) -> String {
        sentences[self.start..self.end].join(" ")
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Lazy enumerator over all candidate spans of a sequence.
#[derive(Debug, Clone)]
pub struct SpanIter {
    len: usize,
    max_size: usize,
    start: usize,
    size: usize,
}

impl Iterator for SpanIter {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        while self.start < self.len {
            if self.size <= self.max_size && self.start + self.size <= self.len {
                let span = Span::new(self.start, self.start + self.size);
                self.size += 1;
                return Some(span);
            }
            self.start += 1;
            self.size = 1;
        }
        None
    }
}

/// Enumerates every span of `1..=max_align_size` consecutive sentences.
///
/// Ordered by start, then length; `O(len * max_align_size)` items.
pub fn enumerate_spans(len: usize, max_align_size: usize) -> Result<SpanIter> {
    if max_align_size < 1 {
        return Err(AlignError::InvalidConfig(format!(
            "max_align_size must be at least 1, got {max_align_size}"
        )));
    }
    Ok(SpanIter {
        len,
        max_size: max_align_size,
        start: 0,
        size: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerates_starts_then_lengths() {
        let spans: Vec<Span> = enumerate_spans(3, 2).unwrap().collect();
        let expected = vec![
            Span::new(0, 1),
            Span::new(0, 2),
            Span::new(1, 2),
            Span::new(1, 3),
            Span::new(2, 3),
        ];
        assert_eq!(spans, expected);
    }

    #[test]
    fn caps_length_at_sequence_end() {
        let spans: Vec<Span> = enumerate_spans(2, 8).unwrap().collect();
        assert_eq!(
            spans,
            vec![Span::new(0, 1), Span::new(0, 2), Span::new(1, 2)]
        );
    }

    #[test]
    fn empty_sequence_yields_nothing() {
        assert_eq!(enumerate_spans(0, 3).unwrap().count(), 0);
    }

    #[test]
    fn rejects_zero_max_size() {
        assert!(matches!(
            enumerate_spans(5, 0),
            Err(AlignError::InvalidConfig(_))
        ));
    }

    #[test]
    fn is_restartable() {
        let it = enumerate_spans(4, 3).unwrap();
        let first: Vec<Span> = it.clone().collect();
        let second: Vec<Span> = it.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4 + 3 + 2);
    }

    #[test]
    fn joined_text_uses_single_spaces() {
        let sentences = vec!["One.".to_string(), "Two.".to_string()];
        assert_eq!(Span::new(0, 2).joined_text(&sentences), "One. Two.");
    }
}
