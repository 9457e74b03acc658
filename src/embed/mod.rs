//! Embedding providers and the per-run span cache.

pub mod cache;
pub mod hashed;
pub mod mock;
#[cfg(feature = "native")]
pub mod native;

pub use cache::DiskCachedProvider;
pub use hashed::HashedEmbedder;
pub use mock::MockEmbedder;
#[cfg(feature = "native")]
pub use native::NativeEmbedder;

/// Maps texts to fixed-dimension vectors.
///
/// Implementations must be deterministic for identical input within one
/// run and must return exactly one vector of `dimension()` floats per
/// input text.
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier used for on-disk cache keying.
    fn signature(&self) -> String;

    /// Vector length produced by this provider.
    fn dimension(&self) -> usize;

    /// Embeds a batch of texts.
    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Scales a vector to unit length in place; zero vectors are left as-is.
pub(crate) fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalize_produces_unit_vectors() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_leaves_zero_vectors_alone() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
