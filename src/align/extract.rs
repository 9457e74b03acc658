//! Turns an alignment path into serializable sentence groups.

use serde::{Deserialize, Serialize};

use super::AlignmentPath;
use crate::document::SentenceSequence;

/// One aligned block: sentence indices and texts for both sides. Gap
/// cells leave one side's lists empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentGroup {
    pub src_numbers: Vec<usize>,
    pub tgt_numbers: Vec<usize>,
    pub src_texts: Vec<String>,
    pub tgt_texts: Vec<String>,
}

/// Materializes the path's cells in order. Pure; cells empty on both
/// sides (which the aligners never produce) are skipped.
pub fn extract_groups(
    path: &AlignmentPath,
    src: &SentenceSequence,
    tgt: &SentenceSequence,
) -> Vec<AlignmentGroup> {
    path.cells
        .iter()
        .filter(|cell| !(cell.src.is_empty() && cell.tgt.is_empty()))
        .map(|cell| AlignmentGroup {
            src_numbers: cell.src.indices().collect(),
            tgt_numbers: cell.tgt.indices().collect(),
            src_texts: cell
                .src
                .indices()
                .map(|i| src.sentences()[i].clone())
                .collect(),
            tgt_texts: cell
                .tgt
                .indices()
                .map(|j| tgt.sentences()[j].clone())
                .collect(),
        })
        .collect()
}
