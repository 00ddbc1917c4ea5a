//! Deterministic, network-free embedder used as the always-available
//! fallback (spec §4.1: "an embedding provider MUST be optional").
//!
//! Hashes each token into a fixed-width bucket and accumulates a simple
//! term-frequency weight, then L2-normalizes. Two calls with the same input
//! text always produce the same vector, which the test suite relies on for
//! reproducible search results.

use super::Embedder;
use crate::error::Result;

pub struct TfIdfEmbedder {
    dimensions: usize,
}

impl TfIdfEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hash: u64 = 1469598103934665603; // FNV offset basis
        for byte in token.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(1099511628211); // FNV prime
        }
        (hash as usize) % self.dimensions
    }
}

impl Embedder for TfIdfEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        let tokens: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.is_empty() {
            return Ok(vector);
        }

        for token in &tokens {
            let idx = self.bucket(&token.to_lowercase());
            vector[idx] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "tfidf-fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_is_deterministic() {
        let e = TfIdfEmbedder::new(64);
        assert_eq!(e.embed("hello world").unwrap(), e.embed("hello world").unwrap());
    }

    #[test]
    fn embed_empty_text_is_zero_vector() {
        let e = TfIdfEmbedder::new(32);
        let v = e.embed("").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn embed_output_is_unit_length_when_nonempty() {
        let e = TfIdfEmbedder::new(128);
        let v = e.embed("the quick brown fox").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn embed_respects_configured_dimensions() {
        let e = TfIdfEmbedder::new(16);
        assert_eq!(e.embed("anything").unwrap().len(), 16);
        assert_eq!(e.dimensions(), 16);
    }
}
