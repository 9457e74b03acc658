//! Bitext sentence alignment.
//!
//! Two independently segmented sentence sequences describing the same
//! narrative are aligned into ordered groups of 1..k sentences per side.
//! Candidate groupings are scored by embedding similarity and the engine
//! finds a minimum-cost monotonic path that covers both sequences exactly,
//! either by an exact dynamic program or by a banded search around a
//! coarse anchor curve.

pub mod anchor;
pub mod cost;
pub mod dp;
pub mod error;
pub mod extract;
pub mod span;
pub mod windowed;

use std::time::{Duration, Instant};

use crate::document::SentenceSequence;
use crate::embed::EmbeddingProvider;

pub use cost::CostModel;
pub use dp::GlobalAligner;
pub use error::{AlignError, Result, Side};
pub use extract::{extract_groups, AlignmentGroup};
pub use span::Span;
pub use windowed::WindowedAligner;

/// Knobs for one alignment run.
#[derive(Debug, Clone)]
pub struct AlignConfig {
    /// Largest number of sentences groupable into one cell, per side.
    pub max_align_size: usize,
    /// Cost per sentence left unmatched in a gap cell.
    pub deletion_penalty: f64,
    /// Weight of the length-ratio penalty in the match cost.
    pub length_weight: f64,
    /// Sentence count per coarse anchor unit (windowed mode).
    pub overlap_width: usize,
    /// Nearest target units kept per source unit (windowed mode).
    pub top_k: usize,
    /// Half-width of the search band around the anchor curve.
    pub window: usize,
    /// Sequence length above which the auto strategy goes windowed.
    pub auto_window_threshold: usize,
    /// Permit one empty side, producing an all-deletion path.
    pub allow_empty: bool,
    /// Per-pair deadline; `None` means unbounded.
    pub timeout: Option<Duration>,
}

impl Default for AlignConfig {
    fn default() -> Self {
        AlignConfig {
            max_align_size: 8,
            deletion_penalty: 0.6,
            length_weight: 0.2,
            overlap_width: 4,
            top_k: 5,
            window: 10,
            auto_window_threshold: 300,
            allow_empty: false,
            timeout: None,
        }
    }
}

impl AlignConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_align_size < 1 {
            return Err(AlignError::InvalidConfig(format!(
                "max_align_size must be at least 1, got {}",
                self.max_align_size
            )));
        }
        if self.max_align_size > 255 {
            return Err(AlignError::InvalidConfig(format!(
                "max_align_size must be at most 255, got {}",
                self.max_align_size
            )));
        }
        if !self.deletion_penalty.is_finite() || self.deletion_penalty < 0.0 {
            return Err(AlignError::InvalidConfig(format!(
                "deletion_penalty must be finite and non-negative, got {}",
                self.deletion_penalty
            )));
        }
        if !self.length_weight.is_finite() || self.length_weight < 0.0 {
            return Err(AlignError::InvalidConfig(format!(
                "length_weight must be finite and non-negative, got {}",
                self.length_weight
            )));
        }
        if self.overlap_width < 1 {
            return Err(AlignError::InvalidConfig(format!(
                "overlap_width must be at least 1, got {}",
                self.overlap_width
            )));
        }
        if self.top_k < 1 {
            return Err(AlignError::InvalidConfig(format!(
                "top_k must be at least 1, got {}",
                self.top_k
            )));
        }
        if self.window < 1 {
            return Err(AlignError::InvalidConfig(format!(
                "window must be at least 1, got {}",
                self.window
            )));
        }
        if self.auto_window_threshold < 1 {
            return Err(AlignError::InvalidConfig(format!(
                "auto_window_threshold must be at least 1, got {}",
                self.auto_window_threshold
            )));
        }
        Ok(())
    }

    pub(crate) fn cost_model(&self) -> CostModel {
        CostModel::new(self.length_weight, self.deletion_penalty)
    }
}

/// One aligned grouping: a source span paired with a target span, at most
/// one of which may be empty.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentCell {
    pub src: Span,
    pub tgt: Span,
    pub cost: f64,
}

/// The engine's output: cells whose source spans tile `[0, n)` and target
/// spans tile `[0, m)`, in order, with consecutive cells abutting exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentPath {
    pub cells: Vec<AlignmentCell>,
    pub total_cost: f64,
}

impl AlignmentPath {
    /// Verifies the partition invariant against the sequence lengths.
    pub fn check_partition(&self, src_len: usize, tgt_len: usize) -> std::result::Result<(), String> {
        let mut i = 0;
        let mut j = 0;
        for (idx, cell) in self.cells.iter().enumerate() {
            if cell.src.start != i {
                return Err(format!(
                    "cell {idx}: source span starts at {} but position is {i}",
                    cell.src.start
                ));
            }
            if cell.tgt.start != j {
                return Err(format!(
                    "cell {idx}: target span starts at {} but position is {j}",
                    cell.tgt.start
                ));
            }
            if cell.src.is_empty() && cell.tgt.is_empty() {
                return Err(format!("cell {idx} is empty on both sides"));
            }
            i = cell.src.end;
            j = cell.tgt.end;
        }
        if i != src_len {
            return Err(format!("source covered up to {i}, expected {src_len}"));
        }
        if j != tgt_len {
            return Err(format!("target covered up to {j}, expected {tgt_len}"));
        }
        Ok(())
    }
}

/// An alignment strategy over a pair of sentence sequences.
pub trait Aligner {
    fn align(
        &self,
        src: &SentenceSequence,
        tgt: &SentenceSequence,
        provider: &dyn EmbeddingProvider,
    ) -> Result<AlignmentPath>;
}

/// Which aligner to run for a document pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Global,
    Windowed,
    /// Windowed above `auto_window_threshold`, global otherwise.
    Auto,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Global => write!(f, "global"),
            Strategy::Windowed => write!(f, "windowed"),
            Strategy::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Strategy::Global),
            "windowed" => Ok(Strategy::Windowed),
            "auto" => Ok(Strategy::Auto),
            other => Err(format!(
                "unknown strategy {other:?}, expected global, windowed or auto"
            )),
        }
    }
}

/// Aligns one pair under the given strategy, falling back to the global
/// aligner when the windowed anchor pass degenerates. Returns the path and
/// the strategy that actually produced it.
pub fn align_pair(
    strategy: Strategy,
    config: &AlignConfig,
    src: &SentenceSequence,
    tgt: &SentenceSequence,
    provider: &dyn EmbeddingProvider,
) -> Result<(AlignmentPath, Strategy)> {
    config.validate()?;
    let effective = match strategy {
        Strategy::Auto => {
            if src.len().max(tgt.len()) > config.auto_window_threshold {
                Strategy::Windowed
            } else {
                Strategy::Global
            }
        }
        other => other,
    };
    match effective {
        Strategy::Global => {
            let aligner = GlobalAligner::new(config.clone())?;
            Ok((aligner.align(src, tgt, provider)?, Strategy::Global))
        }
        Strategy::Windowed => {
            let aligner = WindowedAligner::new(config.clone())?;
            match aligner.align(src, tgt, provider) {
                Ok(path) => Ok((path, Strategy::Windowed)),
                Err(err) if err.is_recoverable() => {
                    let fallback = GlobalAligner::new(config.clone())?;
                    Ok((fallback.align(src, tgt, provider)?, Strategy::Global))
                }
                Err(err) => Err(err),
            }
        }
        Strategy::Auto => unreachable!("auto resolved above"),
    }
}

/// Rejects empty sides unless the configuration relaxes them.
pub(crate) fn check_inputs(config: &AlignConfig, src_len: usize, tgt_len: usize) -> Result<()> {
    if config.allow_empty {
        return Ok(());
    }
    if src_len == 0 {
        return Err(AlignError::EmptyInput { side: Side::Source });
    }
    if tgt_len == 0 {
        return Err(AlignError::EmptyInput { side: Side::Target });
    }
    Ok(())
}

/// Wall-clock budget for one document pair.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    t0: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub(crate) fn start(limit: Option<Duration>) -> Self {
        Deadline {
            t0: Instant::now(),
            limit,
        }
    }

    pub(crate) fn check(&self) -> Result<()> {
        if let Some(limit) = self.limit {
            let elapsed = self.t0.elapsed();
            if elapsed > limit {
                return Err(AlignError::Timeout { elapsed });
            }
        }
        Ok(())
    }
}
