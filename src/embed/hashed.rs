//! Character n-gram feature hashing.
//!
//! A dependency-free provider: every n-gram of the lowercased text is
//! hashed into one of `dim` buckets with a hash-derived sign, and the
//! bucket counts are L2-normalized. Crude next to a trained model, but
//! deterministic across runs and useful as the default and in tests.

use super::{l2_normalize, EmbeddingProvider};

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

#[derive(Debug, Clone)]
pub struct HashedEmbedder {
    dim: usize,
    min_gram: usize,
    max_gram: usize,
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        HashedEmbedder::new(256, 1, 3)
    }
}

impl HashedEmbedder {
    /// `dim` buckets over n-grams of `min_gram..=max_gram` characters.
    pub fn new(dim: usize, min_gram: usize, max_gram: usize) -> Self {
        debug_assert!(dim >= 1 && min_gram >= 1 && min_gram <= max_gram);
        HashedEmbedder {
            dim,
            min_gram,
            max_gram,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        for n in self.min_gram..=self.max_gram {
            if chars.len() < n {
                break;
            }
            for gram in chars.windows(n) {
                let mut h = FNV_OFFSET;
                let mut buf = [0u8; 4];
                for ch in gram {
                    for b in ch.encode_utf8(&mut buf).bytes() {
                        h ^= u64::from(b);
                        h = h.wrapping_mul(FNV_PRIME);
                    }
                }
                let bucket = (h % self.dim as u64) as usize;
                let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
                v[bucket] += sign;
            }
        }
        l2_normalize(&mut v);
        v
    }
}

impl EmbeddingProvider for HashedEmbedder {
    fn signature(&self) -> String {
        format!("hashed:v1:{}:{}-{}", self.dim, self.min_gram, self.max_gram)
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
