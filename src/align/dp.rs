//! Minimum-cost alignment search.
//!
//! The state `D[i][j]` is the cheapest way to align the first `i` source
//! sentences against the first `j` target sentences. A transition `(a, b)`
//! with `0 <= a, b <= k`, not both zero, closes the path with a cell
//! grouping the last `a` source and `b` target sentences; `a = 0` or
//! `b = 0` charges the deletion penalty instead of a similarity lookup.
//! The table is stored row-compressed so the same solver serves both the
//! full search and the banded search around an anchor curve.

use super::error::{AlignError, Result, Side};
use super::span::Span;
use super::{check_inputs, AlignConfig, Aligner, AlignmentCell, AlignmentPath, Deadline};
use crate::document::SentenceSequence;
use crate::embed::cache::SpanEmbeddings;
use crate::embed::EmbeddingProvider;

/// Inclusive per-row column bounds for the search.
#[derive(Debug, Clone)]
pub(crate) struct Band {
    pub(crate) lo: Vec<usize>,
    pub(crate) hi: Vec<usize>,
}

impl Band {
    /// The unrestricted band: every column in every row.
    pub(crate) fn full(n: usize, m: usize) -> Band {
        Band {
            lo: vec![0; n + 1],
            hi: vec![m; n + 1],
        }
    }

    /// Rows centered on an anchor curve with half-width `window`.
    pub(crate) fn around(anchor: &[usize], window: usize, m: usize) -> Band {
        let lo = anchor.iter().map(|&f| f.saturating_sub(window)).collect();
        let hi = anchor.iter().map(|&f| (f + window).min(m)).collect();
        Band { lo, hi }
    }

    /// Repairs the band so a complete path from `(0, 0)` to `(n, m)` always
    /// exists: bounds clamped to the table, both corners included, `lo` and
    /// `hi` monotone, and every row overlapping its predecessor.
    pub(crate) fn normalize(&mut self, m: usize) {
        let n = self.lo.len() - 1;
        for i in 0..=n {
            self.lo[i] = self.lo[i].min(m);
            self.hi[i] = self.hi[i].clamp(self.lo[i], m);
        }
        self.lo[0] = 0;
        self.hi[n] = m;
        for i in (0..n).rev() {
            self.lo[i] = self.lo[i].min(self.lo[i + 1]);
        }
        for i in 1..=n {
            self.hi[i] = self.hi[i].max(self.hi[i - 1]);
        }
        for i in 1..=n {
            if self.lo[i] > self.hi[i - 1] {
                self.lo[i] = self.hi[i - 1];
            }
        }
    }

    fn contains(&self, i: usize, j: usize) -> bool {
        self.lo[i] <= j && j <= self.hi[i]
    }
}

/// Runs the dynamic program restricted to `band` and backtracks the
/// cheapest path. The band must be normalized (or full).
pub(crate) fn solve_banded(
    src_emb: &SpanEmbeddings,
    tgt_emb: &SpanEmbeddings,
    n: usize,
    m: usize,
    config: &AlignConfig,
    band: &Band,
    deadline: &Deadline,
) -> Result<AlignmentPath> {
    let k = config.max_align_size;
    let model = config.cost_model();

    let mut row_off = Vec::with_capacity(n + 1);
    let mut total = 0usize;
    for i in 0..=n {
        row_off.push(total);
        total += band.hi[i] - band.lo[i] + 1;
    }

    let mut best = vec![f64::INFINITY; total];
    // Chosen transition per state, packed as (a << 8) | b.
    let mut back = vec![0u16; total];
    best[0] = 0.0;

    for i in 0..=n {
        deadline.check()?;
        for j in band.lo[i]..=band.hi[i] {
            if i == 0 && j == 0 {
                continue;
            }
            let cur = row_off[i] + (j - band.lo[i]);
            let mut best_cost = f64::INFINITY;
            let mut best_move = 0u16;
            // Transitions ordered by group size (a + b), then by a, so the
            // first strict minimum realizes the smallest-group tie-break.
            for step in 1..=2 * k {
                let a_min = step.saturating_sub(k);
                let a_max = step.min(k);
                for a in a_min..=a_max {
                    let b = step - a;
                    if a > i || b > j {
                        continue;
                    }
                    let (pi, pj) = (i - a, j - b);
                    if !band.contains(pi, pj) {
                        continue;
                    }
                    let prev_cost = best[row_off[pi] + (pj - band.lo[pi])];
                    if !prev_cost.is_finite() {
                        continue;
                    }
                    let cell_cost = if a == 0 {
                        model.gap_cost(b)
                    } else if b == 0 {
                        model.gap_cost(a)
                    } else {
                        model.match_cost(
                            src_emb.get(Span::new(pi, i)),
                            tgt_emb.get(Span::new(pj, j)),
                            a,
                            b,
                        )
                    };
                    let cand = prev_cost + cell_cost;
                    if cand < best_cost {
                        best_cost = cand;
                        best_move = ((a as u16) << 8) | b as u16;
                    }
                }
            }
            best[cur] = best_cost;
            back[cur] = best_move;
        }
    }

    let goal = row_off[n] + (m - band.lo[n]);
    let total_cost = best[goal];
    if !total_cost.is_finite() {
        return Err(AlignError::InvalidConfig(
            "search band excluded every complete path".to_string(),
        ));
    }

    let mut cells = Vec::new();
    let (mut i, mut j) = (n, m);
    while i > 0 || j > 0 {
        let cur = row_off[i] + (j - band.lo[i]);
        let mv = back[cur];
        let (a, b) = ((mv >> 8) as usize, (mv & 0xff) as usize);
        debug_assert!(a + b > 0, "stuck traceback at ({i}, {j})");
        let prev = row_off[i - a] + (j - b - band.lo[i - a]);
        cells.push(AlignmentCell {
            src: Span::new(i - a, i),
            tgt: Span::new(j - b, j),
            cost: best[cur] - best[prev],
        });
        i -= a;
        j -= b;
    }
    cells.reverse();

    let path = AlignmentPath { cells, total_cost };
    debug_assert!(path.check_partition(n, m).is_ok());
    Ok(path)
}

/// Exact aligner: searches the whole `(n, m)` table.
#[derive(Debug, Clone)]
pub struct GlobalAligner {
    config: AlignConfig,
}

impl GlobalAligner {
    pub fn new(config: AlignConfig) -> Result<Self> {
        config.validate()?;
        Ok(GlobalAligner { config })
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }
}

impl Aligner for GlobalAligner {
    fn align(
        &self,
        src: &SentenceSequence,
        tgt: &SentenceSequence,
        provider: &dyn EmbeddingProvider,
    ) -> Result<AlignmentPath> {
        check_inputs(&self.config, src.len(), tgt.len())?;
        let deadline = Deadline::start(self.config.timeout);
        let src_emb = SpanEmbeddings::build(
            src.sentences(),
            self.config.max_align_size,
            Side::Source,
            provider,
            &deadline,
        )?;
        let tgt_emb = SpanEmbeddings::build(
            tgt.sentences(),
            self.config.max_align_size,
            Side::Target,
            provider,
            &deadline,
        )?;
        let band = Band::full(src.len(), tgt.len());
        solve_banded(
            &src_emb,
            &tgt_emb,
            src.len(),
            tgt.len(),
            &self.config,
            &band,
            &deadline,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{HashedEmbedder, MockEmbedder};
    use proptest::prelude::*;
    use std::time::Duration;

    fn seq(id: &str, lines: &[&str]) -> SentenceSequence {
        SentenceSequence::new(id, lines.iter().copied())
    }

    fn aligner(config: AlignConfig) -> GlobalAligner {
        GlobalAligner::new(config).unwrap()
    }

    #[test]
    fn one_sentence_each_yields_a_single_cell() {
        let provider = HashedEmbedder::default();
        let src = seq("s", &["Hello there."]);
        let tgt = seq("t", &["Hello there."]);
        let path = aligner(AlignConfig::default())
            .align(&src, &tgt, &provider)
            .unwrap();
        assert_eq!(path.cells.len(), 1);
        assert_eq!(path.cells[0].src, Span::new(0, 1));
        assert_eq!(path.cells[0].tgt, Span::new(0, 1));
        assert!(path.total_cost.abs() < 1e-6);
    }

    #[test]
    fn identical_sequences_align_on_the_diagonal() {
        let provider = HashedEmbedder::default();
        let lines = [
            "The ship sailed at dawn.",
            "Nobody watched it leave.",
            "The harbor stayed quiet.",
            "Gulls circled the masts.",
            "Rain came in from the east.",
            "By noon the pier was empty.",
        ];
        let src = seq("s", &lines);
        let tgt = seq("t", &lines);
        let path = aligner(AlignConfig::default())
            .align(&src, &tgt, &provider)
            .unwrap();
        assert_eq!(path.cells.len(), lines.len());
        for (i, cell) in path.cells.iter().enumerate() {
            assert_eq!(cell.src, Span::new(i, i + 1));
            assert_eq!(cell.tgt, Span::new(i, i + 1));
        }
        assert!(path.total_cost.abs() < 1e-6, "cost={}", path.total_cost);
        assert!(path.check_partition(src.len(), tgt.len()).is_ok());
    }

    #[test]
    fn ties_prefer_the_smallest_grouping() {
        // Every text maps to one shared vector, so all match cells cost
        // zero and the tie-break alone decides the path shape.
        let mut provider = MockEmbedder::new(4);
        let lines = ["a.", "b.", "c.", "d."];
        for start in 0..lines.len() {
            for end in start + 1..=lines.len() {
                provider.insert(lines[start..end].join(" "), vec![1.0, 0.0, 0.0, 0.0]);
            }
        }
        let src = seq("s", &lines);
        let tgt = seq("t", &lines);
        let path = aligner(AlignConfig::default())
            .align(&src, &tgt, &provider)
            .unwrap();
        assert_eq!(path.cells.len(), lines.len());
        for cell in &path.cells {
            assert_eq!(cell.src.len(), 1);
            assert_eq!(cell.tgt.len(), 1);
        }
    }

    #[test]
    fn crafted_embeddings_force_a_two_to_one_group() {
        let mut provider = MockEmbedder::new(3);
        provider.insert("A1.", vec![0.3, 0.95, 0.0]);
        provider.insert("A2.", vec![0.3, 0.0, 0.95]);
        provider.insert("A1. A2.", vec![1.0, 0.05, 0.05]);
        provider.insert("B1 B2 combined.", vec![1.0, 0.0, 0.0]);

        let src = seq("s", &["A1.", "A2."]);
        let tgt = seq("t", &["B1 B2 combined."]);
        let path = aligner(AlignConfig::default())
            .align(&src, &tgt, &provider)
            .unwrap();
        assert_eq!(path.cells.len(), 1);
        assert_eq!(path.cells[0].src, Span::new(0, 2));
        assert_eq!(path.cells[0].tgt, Span::new(0, 1));
    }

    #[test]
    fn empty_sides_are_rejected_by_default() {
        let provider = HashedEmbedder::default();
        let empty = seq("e", &[]);
        let one = seq("o", &["Only line."]);
        let a = aligner(AlignConfig::default());
        assert!(matches!(
            a.align(&empty, &one, &provider),
            Err(AlignError::EmptyInput { side: Side::Source })
        ));
        assert!(matches!(
            a.align(&one, &empty, &provider),
            Err(AlignError::EmptyInput { side: Side::Target })
        ));
    }

    #[test]
    fn relaxed_config_turns_an_empty_target_into_deletions() {
        let provider = HashedEmbedder::default();
        let config = AlignConfig {
            allow_empty: true,
            ..AlignConfig::default()
        };
        let src = seq("s", &["One.", "Two.", "Three."]);
        let tgt = seq("t", &[]);
        let path = aligner(config.clone()).align(&src, &tgt, &provider).unwrap();
        assert_eq!(path.cells.len(), 3);
        for (i, cell) in path.cells.iter().enumerate() {
            assert_eq!(cell.src, Span::new(i, i + 1));
            assert!(cell.tgt.is_empty());
        }
        let expected = 3.0 * config.deletion_penalty;
        assert!((path.total_cost - expected).abs() < 1e-9);
    }

    #[test]
    fn zero_timeout_reports_timeout() {
        let provider = HashedEmbedder::default();
        let config = AlignConfig {
            timeout: Some(Duration::ZERO),
            ..AlignConfig::default()
        };
        let src = seq("s", &["One.", "Two."]);
        let tgt = seq("t", &["One.", "Two."]);
        let res = aligner(config).align(&src, &tgt, &provider);
        assert!(matches!(res, Err(AlignError::Timeout { .. })));
    }

    #[test]
    fn embedding_failures_carry_the_span() {
        // The mock knows no texts, so the very first chunk fails.
        let provider = MockEmbedder::new(4);
        let src = seq("s", &["Alpha.", "Beta."]);
        let tgt = seq("t", &["Gamma."]);
        match aligner(AlignConfig::default()).align(&src, &tgt, &provider) {
            Err(AlignError::EmbeddingFailure { side, start, end, .. }) => {
                assert_eq!(side, Side::Source);
                assert!(start < end);
            }
            other => panic!("expected embedding failure, got {other:?}"),
        }
    }

    #[test]
    fn normalize_repairs_a_broken_band() {
        let mut band = Band {
            lo: vec![3, 5, 9, 9],
            hi: vec![4, 6, 12, 9],
        };
        band.normalize(10);
        let n = band.lo.len() - 1;
        assert_eq!(band.lo[0], 0);
        assert_eq!(band.hi[n], 10);
        for i in 1..=n {
            assert!(band.lo[i] >= band.lo[i - 1]);
            assert!(band.hi[i] >= band.hi[i - 1]);
            assert!(band.lo[i] <= band.hi[i - 1], "row {i} does not overlap");
        }
        for i in 0..=n {
            assert!(band.lo[i] <= band.hi[i]);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn random_inputs_produce_valid_deterministic_partitions(
            src_lines in prop::collection::vec("[a-z]{2,8}( [a-z]{2,8}){0,4}\\.", 1..18),
            tgt_lines in prop::collection::vec("[a-z]{2,8}( [a-z]{2,8}){0,4}\\.", 1..18),
            k in 1usize..4,
        ) {
            let provider = HashedEmbedder::new(64, 1, 3);
            let config = AlignConfig { max_align_size: k, ..AlignConfig::default() };
            let src = SentenceSequence::new("s", src_lines.iter().cloned());
            let tgt = SentenceSequence::new("t", tgt_lines.iter().cloned());
            let a = GlobalAligner::new(config).unwrap();

            let path = a.align(&src, &tgt, &provider).unwrap();
            prop_assert!(path.check_partition(src.len(), tgt.len()).is_ok());
            for cell in &path.cells {
                prop_assert!(cell.src.len() <= k);
                prop_assert!(cell.tgt.len() <= k);
                prop_assert!(cell.cost.is_finite());
            }

            let again = a.align(&src, &tgt, &provider).unwrap();
            prop_assert_eq!(path, again);
        }
    }
}
