use std::path::Path;

use crate::textutil;

/// An ordered, read-only list of non-empty sentences in one language.
///
/// Construction normalizes whitespace and drops empty lines; afterwards
/// the order and content never change, and a sentence's index is its
/// identity for the whole alignment run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceSequence {
    id: String,
    sentences: Vec<String>,
}

impl SentenceSequence {
    pub fn new<I, S>(id: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sentences = lines
            .into_iter()
            .map(|l| textutil::clean_line(&l.into()))
            .filter(|l| !l.is_empty())
            .collect();
        SentenceSequence {
            id: id.into(),
            sentences,
        }
    }

    /// Reads a one-sentence-per-line file; the file stem becomes the id.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let lines = textutil::read_sentence_lines(path)?;
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(SentenceSequence { id, sentences: lines })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    pub fn total_chars(&self) -> usize {
        self.sentences.iter().map(|s| s.chars().count()).sum()
    }
}

/// One chapter extracted from a book, before alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterDocument {
    /// Identifier derived from the container entry, stable across runs.
    pub chapter_id: String,
    /// Human-readable title from the table of contents, if any.
    pub title: String,
    /// Cleaned paragraph lines.
    pub lines: Vec<String>,
}

impl ChapterDocument {
    pub fn total_chars(&self) -> usize {
        self.lines.iter().map(|l| l.chars().count()).sum()
    }

    /// File name for the extracted chapter, zero-padded so a directory
    /// listing keeps reading order.
    pub fn stage_file_name(&self, index: usize) -> String {
        format!(
            "{:02}__{}__{}.stage1",
            index,
            textutil::sanitize_file_stem(&self.chapter_id),
            textutil::sanitize_file_stem(&self.title),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_cleans_and_drops_empty_lines() {
        let seq = SentenceSequence::new("x", ["  One.  ", "", "  ", "Two\tthree."]);
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.sentences(), &["One.", "Two three."]);
        assert_eq!(seq.id(), "x");
    }

    #[test]
    fn total_chars_counts_characters_not_bytes() {
        let seq = SentenceSequence::new("x", ["日本語です。"]);
        assert_eq!(seq.total_chars(), 6);
    }

    #[test]
    fn stage_file_names_are_sortable_and_safe() {
        let ch = ChapterDocument {
            chapter_id: "part1/ch03.xhtml".to_string(),
            title: "第三章 出発".to_string(),
            lines: vec![],
        };
        assert_eq!(ch.stage_file_name(3), "03__part1_ch03.xhtml__第三章_出発.stage1");
    }
}
