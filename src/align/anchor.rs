//! Coarse correspondence search and monotone anchor fitting.
//!
//! The windowed aligner first sketches where the true alignment runs:
//! each position gets one coarse unit (the next `overlap_width` sentences
//! joined), units are matched by embedding similarity, and a maximum-weight
//! strictly-increasing chain through the matches becomes the anchor curve
//! the banded search follows.

use super::cost::cosine_similarity;
use super::error::{Result, Side};
use super::span::Span;
use super::Deadline;
use crate::embed::cache::embed_spans;
use crate::embed::EmbeddingProvider;

/// A candidate match between one source unit and one target unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Correspondence {
    pub(crate) src: usize,
    pub(crate) tgt: usize,
    pub(crate) weight: f32,
}

/// One unit per position: the span of up to `width` sentences starting
/// there, truncated at the end of the sequence.
pub(crate) fn coarse_unit_spans(len: usize, width: usize) -> Vec<Span> {
    (0..len)
        .map(|i| Span::new(i, (i + width).min(len)))
        .collect()
}

/// Embeds the coarse units of one side.
pub(crate) fn embed_units(
    sentences: &[String],
    width: usize,
    side: Side,
    provider: &dyn EmbeddingProvider,
    deadline: &Deadline,
) -> Result<Vec<Vec<f32>>> {
    let spans = coarse_unit_spans(sentences.len(), width);
    let texts: Vec<String> = spans.iter().map(|s| s.joined_text(sentences)).collect();
    embed_spans(provider, &texts, &spans, side, deadline)
}

/// For each source unit, the `top_k` most similar target units, scanned
/// exhaustively. Candidates come out grouped by source position.
pub(crate) fn nearest_candidates(
    src_units: &[Vec<f32>],
    tgt_units: &[Vec<f32>],
    top_k: usize,
    deadline: &Deadline,
) -> Result<Vec<Correspondence>> {
    let mut out = Vec::with_capacity(src_units.len() * top_k);
    for (i, query) in src_units.iter().enumerate() {
        if i % 64 == 0 {
            deadline.check()?;
        }
        let mut best: Vec<(f32, usize)> = Vec::with_capacity(top_k + 1);
        for (j, unit) in tgt_units.iter().enumerate() {
            let sim = cosine_similarity(query, unit);
            let pos = best.partition_point(|(s, _)| *s >= sim);
            if pos < top_k {
                best.insert(pos, (sim, j));
                if best.len() > top_k {
                    best.pop();
                }
            }
        }
        out.extend(best.into_iter().map(|(weight, tgt)| Correspondence {
            src: i,
            tgt,
            weight,
        }));
    }
    Ok(out)
}

/// Fenwick tree holding a running prefix maximum of (weight, payload).
struct PrefixMax {
    tree: Vec<(f64, usize)>,
}

impl PrefixMax {
    fn new(size: usize) -> Self {
        PrefixMax {
            tree: vec![(f64::NEG_INFINITY, 0); size + 1],
        }
    }

    fn update(&mut self, pos: usize, value: (f64, usize)) {
        let mut i = pos + 1;
        while i < self.tree.len() {
            if value.0 > self.tree[i].0 {
                self.tree[i] = value;
            }
            i += i & i.wrapping_neg();
        }
    }

    /// Maximum over positions `0..=pos`.
    fn query(&self, pos: usize) -> (f64, usize) {
        let mut acc = (f64::NEG_INFINITY, 0);
        let mut i = pos + 1;
        while i > 0 {
            if self.tree[i].0 > acc.0 {
                acc = self.tree[i];
            }
            i -= i & i.wrapping_neg();
        }
        acc
    }
}

/// Maximum-weight chain of correspondences strictly increasing in both
/// coordinates. Candidates must arrive grouped by ascending source
/// position; `tgt_len` bounds the target positions.
pub(crate) fn monotone_chain(
    candidates: &[Correspondence],
    tgt_len: usize,
) -> Vec<Correspondence> {
    if candidates.is_empty() || tgt_len == 0 {
        return Vec::new();
    }

    let mut score = vec![0.0f64; candidates.len()];
    // Predecessor index + 1; 0 marks a chain start.
    let mut parent = vec![0usize; candidates.len()];
    let mut fenwick = PrefixMax::new(tgt_len);

    let mut group_start = 0;
    while group_start < candidates.len() {
        let src = candidates[group_start].src;
        let mut group_end = group_start;
        while group_end < candidates.len() && candidates[group_end].src == src {
            group_end += 1;
        }
        // Query first for the whole group so same-source candidates can
        // never chain to each other.
        for idx in group_start..group_end {
            let cand = candidates[idx];
            let (prefix, prefix_idx) = if cand.tgt == 0 {
                (f64::NEG_INFINITY, 0)
            } else {
                fenwick.query(cand.tgt - 1)
            };
            if prefix > 0.0 {
                score[idx] = prefix + f64::from(cand.weight);
                parent[idx] = prefix_idx;
            } else {
                score[idx] = f64::from(cand.weight);
                parent[idx] = 0;
            }
        }
        for idx in group_start..group_end {
            fenwick.update(candidates[idx].tgt, (score[idx], idx + 1));
        }
        group_start = group_end;
    }

    let mut best_idx = 0;
    for idx in 1..candidates.len() {
        if score[idx] > score[best_idx] {
            best_idx = idx;
        }
    }

    let mut chain = Vec::new();
    let mut cursor = best_idx + 1;
    while cursor != 0 {
        chain.push(candidates[cursor - 1]);
        cursor = parent[cursor - 1];
    }
    chain.reverse();
    chain
}

/// Interpolates the chain into one target position per source row,
/// pinned to `(0, 0)` and `(n, m)`.
pub(crate) fn anchor_rows(chain: &[Correspondence], n: usize, m: usize) -> Vec<usize> {
    let mut points: Vec<(usize, usize)> = Vec::with_capacity(chain.len() + 2);
    points.push((0, 0));
    points.extend(
        chain
            .iter()
            .filter(|c| c.src > 0 && c.src < n && c.tgt > 0 && c.tgt < m)
            .map(|c| (c.src, c.tgt)),
    );
    points.push((n, m));

    let mut rows = vec![0usize; n + 1];
    for pair in points.windows(2) {
        let (i0, j0) = pair[0];
        let (i1, j1) = pair[1];
        let di = i1 - i0;
        for i in i0..=i1 {
            rows[i] = j0 + ((j1 - j0) * (i - i0) + di / 2) / di;
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{EmbeddingProvider, HashedEmbedder};

    #[test]
    fn unit_spans_truncate_at_the_end() {
        let spans = coarse_unit_spans(5, 3);
        assert_eq!(spans.len(), 5);
        assert_eq!(spans[0], Span::new(0, 3));
        assert_eq!(spans[3], Span::new(3, 5));
        assert_eq!(spans[4], Span::new(4, 5));
    }

    #[test]
    fn nearest_candidates_rank_by_similarity() {
        let src = vec![vec![1.0, 0.0, 0.0]];
        let tgt = vec![
            vec![0.0, 1.0, 0.0],
            vec![0.9, 0.1, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        let cands = nearest_candidates(&src, &tgt, 2, &Deadline::start(None)).unwrap();
        assert_eq!(cands.len(), 2);
        assert_eq!(cands[0].tgt, 2);
        assert_eq!(cands[1].tgt, 1);
        assert!(cands[0].weight > cands[1].weight);
    }

    #[test]
    fn chain_skips_an_off_diagonal_outlier() {
        let cands = vec![
            Correspondence { src: 0, tgt: 0, weight: 1.0 },
            Correspondence { src: 1, tgt: 5, weight: 0.9 },
            Correspondence { src: 2, tgt: 2, weight: 1.0 },
            Correspondence { src: 3, tgt: 3, weight: 1.0 },
        ];
        let chain = monotone_chain(&cands, 6);
        let picked: Vec<(usize, usize)> = chain.iter().map(|c| (c.src, c.tgt)).collect();
        assert_eq!(picked, vec![(0, 0), (2, 2), (3, 3)]);
    }

    #[test]
    fn chain_is_strictly_increasing_in_both_coordinates() {
        let cands = vec![
            Correspondence { src: 0, tgt: 1, weight: 0.6 },
            Correspondence { src: 0, tgt: 2, weight: 0.5 },
            Correspondence { src: 1, tgt: 1, weight: 0.7 },
            Correspondence { src: 1, tgt: 3, weight: 0.4 },
            Correspondence { src: 2, tgt: 3, weight: 0.9 },
        ];
        let chain = monotone_chain(&cands, 4);
        for pair in chain.windows(2) {
            assert!(pair[1].src > pair[0].src);
            assert!(pair[1].tgt > pair[0].tgt);
        }
        assert!(chain.len() >= 2);
    }

    #[test]
    fn negative_weights_do_not_extend_the_chain() {
        let cands = vec![
            Correspondence { src: 0, tgt: 0, weight: -0.2 },
            Correspondence { src: 1, tgt: 1, weight: 0.8 },
        ];
        let chain = monotone_chain(&cands, 2);
        let picked: Vec<(usize, usize)> = chain.iter().map(|c| (c.src, c.tgt)).collect();
        assert_eq!(picked, vec![(1, 1)]);
    }

    #[test]
    fn anchor_rows_interpolate_between_pins() {
        let chain = vec![
            Correspondence { src: 2, tgt: 4, weight: 1.0 },
            Correspondence { src: 6, tgt: 8, weight: 1.0 },
        ];
        let rows = anchor_rows(&chain, 8, 10);
        assert_eq!(rows[0], 0);
        assert_eq!(rows[2], 4);
        assert_eq!(rows[4], 6);
        assert_eq!(rows[6], 8);
        assert_eq!(rows[8], 10);
        for w in rows.windows(2) {
            assert!(w[1] >= w[0]);
        }
    }

    #[test]
    fn anchor_rows_with_an_empty_chain_run_corner_to_corner() {
        let rows = anchor_rows(&[], 4, 8);
        assert_eq!(rows, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn embedded_units_cover_every_position() {
        let provider = HashedEmbedder::new(32, 1, 2);
        let sentences: Vec<String> = (0..4).map(|i| format!("line number {i}.")).collect();
        let units = embed_units(
            &sentences,
            3,
            Side::Source,
            &provider,
            &Deadline::start(None),
        )
        .unwrap();
        assert_eq!(units.len(), 4);
        assert_eq!(units[0].len(), provider.dimension());
    }
}
