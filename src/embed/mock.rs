//! Fixed-vector provider for tests and dry runs.

use std::collections::HashMap;

use super::EmbeddingProvider;

/// Returns pre-registered vectors and fails on anything else, which makes
/// provider-failure paths easy to exercise.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedder {
    dim: usize,
    map: HashMap<String, Vec<f32>>,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        MockEmbedder {
            dim,
            map: HashMap::new(),
        }
    }

    pub fn insert(&mut self, text: impl Into<String>, vector: Vec<f32>) {
        debug_assert_eq!(vector.len(), self.dim);
        self.map.insert(text.into(), vector);
    }
}

impl EmbeddingProvider for MockEmbedder {
    fn signature(&self) -> String {
        format!("mock:{}", self.dim)
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|t| {
                self.map
                    .get(*t)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("no embedding registered for {t:?}"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_registered_vectors() {
        let mut e = MockEmbedder::new(2);
        e.insert("a", vec![1.0, 0.0]);
        let out = e.embed_batch(&["a"]).unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0]]);
    }

    #[test]
    fn unknown_text_is_an_error() {
        let e = MockEmbedder::new(2);
        assert!(e.embed_batch(&["missing"]).is_err());
    }
}
