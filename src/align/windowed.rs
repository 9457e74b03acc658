//! Approximate aligner for long documents.
//!
//! Instead of filling the whole `(n, m)` table, the search is confined to
//! a band around a coarse anchor curve fitted from nearest-neighbor
//! matches between overlap units. When the unit matches are too sparse to
//! fit a curve the pass reports `DegenerateAnchor` and callers fall back
//! to the exact aligner.

use super::anchor::{anchor_rows, embed_units, monotone_chain, nearest_candidates};
use super::dp::{solve_banded, Band};
use super::error::{AlignError, Result, Side};
use super::{check_inputs, AlignConfig, Aligner, AlignmentPath, Deadline};
use crate::document::SentenceSequence;
use crate::embed::cache::SpanEmbeddings;
use crate::embed::EmbeddingProvider;

#[derive(Debug, Clone)]
pub struct WindowedAligner {
    config: AlignConfig,
}

impl WindowedAligner {
    pub fn new(config: AlignConfig) -> Result<Self> {
        config.validate()?;
        Ok(WindowedAligner { config })
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    fn build_span_caches(
        &self,
        src: &SentenceSequence,
        tgt: &SentenceSequence,
        provider: &dyn EmbeddingProvider,
        deadline: &Deadline,
    ) -> Result<(SpanEmbeddings, SpanEmbeddings)> {
        let src_emb = SpanEmbeddings::build(
            src.sentences(),
            self.config.max_align_size,
            Side::Source,
            provider,
            deadline,
        )?;
        let tgt_emb = SpanEmbeddings::build(
            tgt.sentences(),
            self.config.max_align_size,
            Side::Target,
            provider,
            deadline,
        )?;
        Ok((src_emb, tgt_emb))
    }
}

impl Aligner for WindowedAligner {
    fn align(
        &self,
        src: &SentenceSequence,
        tgt: &SentenceSequence,
        provider: &dyn EmbeddingProvider,
    ) -> Result<AlignmentPath> {
        check_inputs(&self.config, src.len(), tgt.len())?;
        let deadline = Deadline::start(self.config.timeout);
        let (n, m) = (src.len(), tgt.len());

        // One empty side (relaxed config) leaves nothing to anchor on;
        // the full table is a single row or column anyway.
        if n == 0 || m == 0 {
            let (src_emb, tgt_emb) = self.build_span_caches(src, tgt, provider, &deadline)?;
            let band = Band::full(n, m);
            return solve_banded(&src_emb, &tgt_emb, n, m, &self.config, &band, &deadline);
        }

        let src_units = embed_units(
            src.sentences(),
            self.config.overlap_width,
            Side::Source,
            provider,
            &deadline,
        )?;
        let tgt_units = embed_units(
            tgt.sentences(),
            self.config.overlap_width,
            Side::Target,
            provider,
            &deadline,
        )?;

        let candidates = nearest_candidates(&src_units, &tgt_units, self.config.top_k, &deadline)?;
        if candidates.len() < 2 {
            return Err(AlignError::DegenerateAnchor {
                anchors: candidates.len(),
            });
        }
        let chain = monotone_chain(&candidates, m);
        if chain.len() < 2 {
            return Err(AlignError::DegenerateAnchor {
                anchors: chain.len(),
            });
        }

        let rows = anchor_rows(&chain, n, m);
        let mut band = Band::around(&rows, self.config.window, m);
        band.normalize(m);

        let (src_emb, tgt_emb) = self.build_span_caches(src, tgt, provider, &deadline)?;
        solve_banded(&src_emb, &tgt_emb, n, m, &self.config, &band, &deadline)
    }
}
