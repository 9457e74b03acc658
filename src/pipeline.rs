//! Chapter-pair batch: pairs staged chapter files by position and aligns
//! them in parallel, isolating per-pair failures so one bad chapter does not
//! sink a book.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use rayon::prelude::*;

use crate::align::{align_pair, extract_groups, AlignConfig, Strategy};
use crate::document::SentenceSequence;
use crate::embed::EmbeddingProvider;
use crate::progress::ConsoleProgress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub aligned: usize,
    pub failed: usize,
}

/// Pairs source and target chapter files by sorted position. Staged files
/// carry a numeric prefix, so lexicographic order is reading order.
pub fn pair_files(
    src: &[PathBuf],
    tgt: &[PathBuf],
    progress: &ConsoleProgress,
) -> Vec<(PathBuf, PathBuf)> {
    let mut src = src.to_vec();
    let mut tgt = tgt.to_vec();
    src.sort();
    tgt.sort();
    if src.len() != tgt.len() {
        progress.warn(format!(
            "{} source files vs {} target files; trailing extras are ignored",
            src.len(),
            tgt.len()
        ));
    }
    src.into_iter().zip(tgt).collect()
}

/// Aligns every pair on a rayon pool and writes one JSON file per pair.
///
/// A failed pair is logged and skipped; the batch itself only errors when
/// nothing at all could be aligned.
pub fn align_batch(
    pairs: &[(PathBuf, PathBuf)],
    out_dir: &Path,
    strategy: Strategy,
    config: &AlignConfig,
    provider: &dyn EmbeddingProvider,
    threads: usize,
    progress: &ConsoleProgress,
) -> anyhow::Result<BatchSummary> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("create output directory {}", out_dir.display()))?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("build worker pool")?;

    let total = pairs.len();
    let done = AtomicUsize::new(0);
    let outcomes: Vec<bool> = pool.install(|| {
        pairs
            .par_iter()
            .map(|(src_path, tgt_path)| {
                let result = align_pair_files(src_path, tgt_path, out_dir, strategy, config, provider);
                let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                let label = format!("{} + {}", display_name(src_path), display_name(tgt_path));
                match result {
                    Ok((groups, used)) => {
                        progress.info(format!("[{n}/{total}] {label}: {groups} groups ({used})"));
                        true
                    }
                    Err(err) => {
                        progress.warn(format!("[{n}/{total}] {label}: {err:#}"));
                        false
                    }
                }
            })
            .collect()
    });

    let aligned = outcomes.iter().filter(|ok| **ok).count();
    let summary = BatchSummary {
        aligned,
        failed: total - aligned,
    };
    if summary.aligned == 0 && summary.failed > 0 {
        anyhow::bail!("all {} chapter pairs failed", summary.failed);
    }
    Ok(summary)
}

fn align_pair_files(
    src_path: &Path,
    tgt_path: &Path,
    out_dir: &Path,
    strategy: Strategy,
    config: &AlignConfig,
    provider: &dyn EmbeddingProvider,
) -> anyhow::Result<(usize, Strategy)> {
    let src = SentenceSequence::from_file(src_path)?;
    let tgt = SentenceSequence::from_file(tgt_path)?;
    let (alignment, used) = align_pair(strategy, config, &src, &tgt, provider)
        .with_context(|| format!("align {} against {}", src.id(), tgt.id()))?;

    let groups = extract_groups(&alignment, &src, &tgt);
    let json = serde_json::to_string_pretty(&groups).context("encode alignment groups")?;
    let out = out_dir.join(format!("{}_{}.json", src.id(), tgt.id()));
    fs::write(&out, json).with_context(|| format!("write {}", out.display()))?;
    Ok((groups.len(), used))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::align::AlignmentGroup;
    use crate::embed::HashedEmbedder;

    fn quiet() -> ConsoleProgress {
        ConsoleProgress::new(false)
    }

    #[test]
    fn files_pair_up_in_sorted_order() {
        let src = vec![PathBuf::from("b/01__x.stage1"), PathBuf::from("b/00__y.stage1")];
        let tgt = vec![
            PathBuf::from("c/01__p.stage1"),
            PathBuf::from("c/00__q.stage1"),
            PathBuf::from("c/02__r.stage1"),
        ];
        let pairs = pair_files(&src, &tgt, &quiet());
        assert_eq!(
            pairs,
            vec![
                (
                    PathBuf::from("b/00__y.stage1"),
                    PathBuf::from("c/00__q.stage1")
                ),
                (
                    PathBuf::from("b/01__x.stage1"),
                    PathBuf::from("c/01__p.stage1")
                ),
            ]
        );
    }

    #[test]
    fn the_batch_writes_one_json_per_pair() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("00__ch__a.stage1");
        let tgt = dir.path().join("00__ch__b.stage1");
        fs::write(&src, "A quiet morning.\nThe harbor was empty.\n").unwrap();
        fs::write(&tgt, "A quiet morning.\nThe harbor was empty.\n").unwrap();

        let out_dir = dir.path().join("aligned");
        let provider = HashedEmbedder::default();
        let summary = align_batch(
            &[(src, tgt)],
            &out_dir,
            Strategy::Global,
            &AlignConfig::default(),
            &provider,
            1,
            &quiet(),
        )
        .unwrap();

        assert_eq!(summary, BatchSummary { aligned: 1, failed: 0 });
        let out = out_dir.join("00__ch__a_00__ch__b.json");
        let groups: Vec<AlignmentGroup> =
            serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(groups.len(), 2, "identical two-line chapters align 1-1");
        assert_eq!(groups[0].src_texts, vec!["A quiet morning.".to_string()]);
    }

    #[test]
    fn a_failed_pair_does_not_sink_the_batch() {
        let dir = TempDir::new().unwrap();
        let good_src = dir.path().join("00__a.stage1");
        let good_tgt = dir.path().join("00__b.stage1");
        let empty_src = dir.path().join("01__a.stage1");
        let empty_tgt = dir.path().join("01__b.stage1");
        fs::write(&good_src, "One line.\n").unwrap();
        fs::write(&good_tgt, "One line.\n").unwrap();
        fs::write(&empty_src, "").unwrap();
        fs::write(&empty_tgt, "Still here.\n").unwrap();

        let provider = HashedEmbedder::default();
        let summary = align_batch(
            &[(good_src, good_tgt), (empty_src, empty_tgt)],
            &dir.path().join("aligned"),
            Strategy::Global,
            &AlignConfig::default(),
            &provider,
            1,
            &quiet(),
        )
        .unwrap();
        assert_eq!(summary, BatchSummary { aligned: 1, failed: 1 });
    }

    #[test]
    fn a_batch_with_no_survivors_is_an_error() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("00__a.stage1");
        let tgt = dir.path().join("00__b.stage1");
        fs::write(&src, "").unwrap();
        fs::write(&tgt, "Text.\n").unwrap();

        let provider = HashedEmbedder::default();
        let err = align_batch(
            &[(src, tgt)],
            &dir.path().join("aligned"),
            Strategy::Global,
            &AlignConfig::default(),
            &provider,
            1,
            &quiet(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("all 1 chapter pairs failed"));
    }
}
