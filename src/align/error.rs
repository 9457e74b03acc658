use std::time::Duration;

/// Which side of a document pair an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Target => write!(f, "target"),
        }
    }
}

/// Errors for the alignment engine.
#[derive(thiserror::Error, Debug)]
pub enum AlignError {
    /// Bad configuration values. Always fatal, never retried.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A sequence had zero sentences. Fatal for the pair only.
    #[error("{side} sequence is empty")]
    EmptyInput {
        /// Side that was empty.
        side: Side,
    },
    /// The embedding provider failed while embedding one span.
    /// Fatal for the pair; the span identifies what to retry.
    #[error("embedding failed for {side} span [{start}, {end}): {source}")]
    EmbeddingFailure {
        /// Side the span belongs to.
        side: Side,
        /// Span start (sentence index).
        start: usize,
        /// Span end (exclusive).
        end: usize,
        /// Provider error.
        #[source]
        source: anyhow::Error,
    },
    /// The windowed aligner found too few correspondences to fit an
    /// anchor curve. Recoverable by falling back to the global aligner.
    #[error("degenerate anchor: only {anchors} correspondence(s), need at least 2")]
    DegenerateAnchor {
        /// Usable correspondences found.
        anchors: usize,
    },
    /// The per-pair deadline expired mid-search.
    #[error("alignment timed out after {elapsed:.1?}")]
    Timeout {
        /// Time spent before giving up.
        elapsed: Duration,
    },
}

impl AlignError {
    /// True for errors a caller can recover from by switching strategy.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AlignError::DegenerateAnchor { .. })
    }
}

/// Convenience result type for the engine.
pub type Result<T> = std::result::Result<T, AlignError>;
