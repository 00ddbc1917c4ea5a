//! Optional OpenAI-compatible embedding backend (`feature = "openai"`).
//!
//! Grounded on the teacher's `OpenAIEmbedder` (`src/embedding/mod.rs`): a
//! blocking `Embedder::embed` bridged onto the async `reqwest` client via
//! `tokio::task::block_in_place` + `Handle::current().block_on`, since the
//! rest of C1-C10's synchronous call sites predate any async rewrite.

use super::Embedder;
use crate::error::{EngramError, Result};
use serde::Deserialize;
use tokio::runtime::Handle;

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(api_base: String, api_key: String, model: String, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base,
            api_key,
            model,
            dimensions,
        }
    }

    async fn embed_async(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|e| EngramError::EmbedUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngramError::EmbedUnavailable(format!(
                "embedding request failed: {}",
                response.status()
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EngramError::EmbedUnavailable(e.to_string()))?;

        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EngramError::EmbedUnavailable("empty embedding response".into()))
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        tokio::task::block_in_place(|| Handle::current().block_on(self.embed_async(text)))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
