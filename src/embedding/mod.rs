//! C1: pluggable embedding providers.
//!
//! Grounded on the teacher's `Embedder` trait (`src/embedding/mod.rs`):
//! fixed-dimension `embed`, a default-impl `embed_batch`, and a factory
//! function. The network-backed provider is feature-gated; a deterministic
//! fallback is always available so the rest of the engine never blocks on
//! network availability (spec §4.1, §7: embedding failures downgrade rather
//! than abort).

#[cfg(feature = "openai")]
mod openai;
mod tfidf;

#[cfg(feature = "openai")]
pub use openai::OpenAiEmbedder;
pub use tfidf::TfIdfEmbedder;

use crate::error::Result;

/// A provider of fixed-dimension embedding vectors.
///
/// Implementors must always return vectors of `dimensions()` length; C4's
/// vector index rebuilds itself if it ever observes a mismatch.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Default batched implementation; providers with a native batch API
    /// (e.g. a single HTTP call for N inputs) should override this.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Cosine similarity between two equal-length vectors. Not used by C4's
/// flat L2 index (which scores by `1/(1+distance)` per spec §4.4); kept as a
/// general-purpose helper for embedder self-tests and callers outside the
/// index path.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Build the embedder selected by configuration.
///
/// When `use_fallback` is set, or the `openai` feature is not compiled in,
/// this always returns the deterministic [`TfIdfEmbedder`] — it never fails
/// and never touches the network, so C6 can always compute a vector.
pub fn create_embedder(config: &crate::config::EmbeddingConfig) -> std::sync::Arc<dyn Embedder> {
    #[cfg(feature = "openai")]
    {
        if !config.use_fallback {
            if let (Some(base), Some(key)) = (&config.api_base, &config.api_key) {
                return std::sync::Arc::new(OpenAiEmbedder::new(
                    base.clone(),
                    key.clone(),
                    config.model.clone(),
                    config.dimensions,
                ));
            }
        }
    }
    let _ = config;
    std::sync::Arc::new(TfIdfEmbedder::new(config.dimensions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn create_embedder_defaults_to_fallback() {
        let cfg = crate::config::EmbeddingConfig::default();
        let embedder = create_embedder(&cfg);
        assert_eq!(embedder.dimensions(), cfg.dimensions);
    }
}
