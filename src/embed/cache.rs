//! Embedding caches: the per-run span table the aligners read from, and an
//! optional on-disk store that survives between batch runs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::EmbeddingProvider;
use crate::align::error::{AlignError, Result, Side};
use crate::align::span::{enumerate_spans, Span};
use crate::align::Deadline;

/// Texts sent to the provider per call.
const EMBED_CHUNK: usize = 128;

/// Embeds span texts in chunks, attributing failures to the span range
/// the failing chunk covered.
pub(crate) fn embed_spans(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    spans: &[Span],
    side: Side,
    deadline: &Deadline,
) -> Result<Vec<Vec<f32>>> {
    debug_assert_eq!(texts.len(), spans.len());
    let dim = provider.dimension();
    let mut out = Vec::with_capacity(texts.len());
    for (chunk_texts, chunk_spans) in texts.chunks(EMBED_CHUNK).zip(spans.chunks(EMBED_CHUNK)) {
        deadline.check()?;
        let start = chunk_spans[0].start;
        let end = chunk_spans.iter().map(|s| s.end).max().unwrap_or(start);
        let refs: Vec<&str> = chunk_texts.iter().map(String::as_str).collect();
        let vectors = provider
            .embed_batch(&refs)
            .map_err(|source| AlignError::EmbeddingFailure { side, start, end, source })?;
        if vectors.len() != refs.len() {
            return Err(AlignError::EmbeddingFailure {
                side,
                start,
                end,
                source: anyhow::anyhow!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    refs.len()
                ),
            });
        }
        for v in &vectors {
            if v.len() != dim {
                return Err(AlignError::EmbeddingFailure {
                    side,
                    start,
                    end,
                    source: anyhow::anyhow!(
                        "provider returned a {}-dim vector, expected {dim}",
                        v.len()
                    ),
                });
            }
        }
        out.extend(vectors);
    }
    Ok(out)
}

/// Eagerly embedded vectors for every candidate span of one sequence.
///
/// Populated once before the search starts, then read-only, so the
/// dynamic program needs no locking.
pub struct SpanEmbeddings {
    max_size: usize,
    dim: usize,
    vectors: Vec<f32>,
}

impl SpanEmbeddings {
    pub(crate) fn build(
        sentences: &[String],
        max_size: usize,
        side: Side,
        provider: &dyn EmbeddingProvider,
        deadline: &Deadline,
    ) -> Result<SpanEmbeddings> {
        let spans: Vec<Span> = enumerate_spans(sentences.len(), max_size)?.collect();
        let texts: Vec<String> = spans.iter().map(|s| s.joined_text(sentences)).collect();
        let embedded = embed_spans(provider, &texts, &spans, side, deadline)?;

        let dim = provider.dimension();
        let mut vectors = vec![0.0f32; sentences.len() * max_size * dim];
        for (span, vector) in spans.iter().zip(embedded) {
            let slot = span.start * max_size + (span.len() - 1);
            vectors[slot * dim..(slot + 1) * dim].copy_from_slice(&vector);
        }
        Ok(SpanEmbeddings {
            max_size,
            dim,
            vectors,
        })
    }

    /// Vector for a span produced by the enumerator this cache was built
    /// from.
    pub(crate) fn get(&self, span: Span) -> &[f32] {
        debug_assert!(!span.is_empty() && span.len() <= self.max_size);
        let slot = span.start * self.max_size + (span.len() - 1);
        &self.vectors[slot * self.dim..(slot + 1) * self.dim]
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    provider: String,
    dimension: usize,
    /// sha256(text) hex -> little-endian f32 bytes, base64.
    vectors: BTreeMap<String, String>,
}

struct CacheState {
    vectors: BTreeMap<String, Vec<f32>>,
    dirty: bool,
}

/// Wraps a provider with a JSON sidecar so repeated runs over the same
/// corpus skip recomputation. Keys are text digests; the provider
/// signature and dimension are recorded in the file header and a mismatch
/// discards the stored entries.
pub struct DiskCachedProvider {
    inner: Box<dyn EmbeddingProvider>,
    path: PathBuf,
    state: Mutex<CacheState>,
}

impl DiskCachedProvider {
    pub fn open(inner: Box<dyn EmbeddingProvider>, path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let vectors = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<CacheFile>(&text) {
                Ok(file) if file.provider == inner.signature() && file.dimension == inner.dimension() => {
                    decode_entries(&file)
                }
                _ => BTreeMap::new(),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("read embedding cache {}", path.display()))
            }
        };
        Ok(DiskCachedProvider {
            inner,
            path,
            state: Mutex::new(CacheState {
                vectors,
                dirty: false,
            }),
        })
    }

    /// Writes the cache back if anything was added since `open`.
    pub fn save(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().expect("embedding cache lock");
        if !state.dirty {
            return Ok(());
        }
        let file = CacheFile {
            provider: self.inner.signature(),
            dimension: self.inner.dimension(),
            vectors: state
                .vectors
                .iter()
                .map(|(key, vec)| {
                    let mut bytes = Vec::with_capacity(vec.len() * 4);
                    for x in vec {
                        bytes.extend_from_slice(&x.to_le_bytes());
                    }
                    (key.clone(), B64.encode(bytes))
                })
                .collect(),
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create cache directory {}", parent.display()))?;
            }
        }
        let text = serde_json::to_string_pretty(&file).context("serialize embedding cache")?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("write embedding cache {}", self.path.display()))?;
        state.dirty = false;
        Ok(())
    }

    /// Cached entry count, for batch summaries.
    pub fn len(&self) -> usize {
        self.state.lock().expect("embedding cache lock").vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn decode_entries(file: &CacheFile) -> BTreeMap<String, Vec<f32>> {
    let mut out = BTreeMap::new();
    for (key, encoded) in &file.vectors {
        let Ok(bytes) = B64.decode(encoded) else { continue };
        if bytes.len() != file.dimension * 4 {
            continue;
        }
        let vec: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        out.insert(key.clone(), vec);
    }
    out
}

fn text_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

impl EmbeddingProvider for DiskCachedProvider {
    fn signature(&self) -> String {
        self.inner.signature()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        let keys: Vec<String> = texts.iter().map(|t| text_key(t)).collect();
        let mut state = self.state.lock().expect("embedding cache lock");

        let mut miss_texts = Vec::new();
        let mut miss_at = Vec::new();
        for (idx, key) in keys.iter().enumerate() {
            if !state.vectors.contains_key(key) {
                miss_texts.push(texts[idx]);
                miss_at.push(idx);
            }
        }
        if !miss_texts.is_empty() {
            let fresh = self.inner.embed_batch(&miss_texts)?;
            anyhow::ensure!(
                fresh.len() == miss_texts.len(),
                "provider returned {} vectors for {} texts",
                fresh.len(),
                miss_texts.len()
            );
            for (idx, vec) in miss_at.iter().zip(fresh) {
                state.vectors.insert(keys[*idx].clone(), vec);
            }
            state.dirty = true;
        }

        Ok(keys
            .iter()
            .map(|key| state.vectors[key].clone())
            .collect())
    }
}
