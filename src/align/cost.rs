//! Similarity scoring for candidate span pairs.
//!
//! A match costs `(1 - cosine) * (1 + w * |ln(src_len / tgt_len)|)`: cosine
//! distance between the span embeddings, inflated when the grouping pairs
//! very different sentence counts. Gap cells are charged a per-sentence
//! deletion penalty so large skips stay proportionally expensive.

/// Cosine similarity with a guard for near-zero norms.
///
/// Identical vectors score exactly 1.0; sqrt rounding must not decide ties
/// between equivalent alignment paths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let identical = a == b;
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let na = na.sqrt();
    let nb = nb.sqrt();
    if na > 1e-9 && nb > 1e-9 {
        if identical {
            1.0
        } else {
            dot / (na * nb)
        }
    } else {
        0.0
    }
}

/// Cost parameters for one alignment run.
#[derive(Debug, Clone, Copy)]
pub struct CostModel {
    /// Weight of the length-ratio penalty term.
    pub length_weight: f64,
    /// Cost per sentence left unmatched in a gap cell.
    pub deletion_penalty: f64,
}

impl CostModel {
    pub fn new(length_weight: f64, deletion_penalty: f64) -> Self {
        CostModel {
            length_weight,
            deletion_penalty,
        }
    }

    /// Cost of pairing two spans given their embeddings and sentence counts.
    ///
    /// Always finite and non-negative; zero only for identical embeddings
    /// with equal sentence counts.
    pub fn match_cost(
        &self,
        src_embedding: &[f32],
        tgt_embedding: &[f32],
        src_len: usize,
        tgt_len: usize,
    ) -> f64 {
        let distance = (1.0 - cosine_similarity(src_embedding, tgt_embedding) as f64).max(0.0);
        let ratio = (src_len as f64 / tgt_len as f64).ln().abs();
        distance * (1.0 + self.length_weight * ratio)
    }

    /// Cost of leaving `len` sentences unmatched on one side.
    pub fn gap_cost(&self, len: usize) -> f64 {
        len as f64 * self.deletion_penalty
    }
}
