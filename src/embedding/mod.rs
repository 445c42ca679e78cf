//! Text-to-vector embedding capability.
//!
//! The engine consumes embeddings through the [`Embedder`] trait; concrete
//! providers are injected (an OpenAI-compatible HTTP provider ships in
//! [`openai`]). [`cache`] bounds repeat work and [`batch`] layers the cache
//! over any provider with order-preserving chunked batching.

pub mod batch;
pub mod cache;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbedderConfig;
use crate::error::{MemoryError, Result};

/// Trait for embedding text into dense vectors.
///
/// Implementations produce vectors of exactly [`Embedder::dimensions`]
/// length. Calls typically suspend on network I/O; callers must not hold
/// locks across them.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings, order-preserving and same length as
    /// the input. Implementations may override for batched inference.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> usize;

    /// Model identifier, used as part of the cache key.
    fn model_id(&self) -> &str;
}

/// A shared embedder that can be used across tasks.
pub type SharedEmbedder = Arc<dyn Embedder>;

/// Default vector length for recognized embedding models.
///
/// Unknown models fall back to 1536; an explicit
/// [`EmbedderConfig::dimensions`] always wins.
pub fn known_dimensions(model_id: &str) -> usize {
    match model_id {
        "text-embedding-3-small" => 1536,
        "text-embedding-3-large" => 3072,
        "text-embedding-ada-002" => 1536,
        "nomic-embed-text" => 768,
        "mxbai-embed-large" => 1024,
        _ => 1536,
    }
}

/// Create an embedding provider from config.
///
/// Currently only `"openai"` is supported (any OpenAI-compatible
/// `/embeddings` endpoint, including Ollama and LM Studio).
pub fn create_embedder(config: &EmbedderConfig) -> Result<SharedEmbedder> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(openai::OpenAiEmbedder::new(config.clone())?)),
        other => Err(MemoryError::InvalidInput(format!(
            "unknown embedding provider: {other}. Supported: openai"
        ))),
    }
}

/// Deterministic embedder for tests and offline smoke runs.
///
/// Generates a pseudo-random unit vector seeded by the text content, so
/// identical texts embed identically without any network dependency.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimensions: usize,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut state: u64 = 5381;
        for byte in text.bytes() {
            state = state.wrapping_mul(33).wrapping_add(u64::from(byte));
        }

        let mut embedding = vec![0.0f32; self.dimensions];
        for slot in embedding.iter_mut() {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            *slot = ((state >> 16) as f32 / 32768.0) % 2.0 - 1.0;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embedder_is_deterministic() {
        let embedder = MockEmbedder::default();
        let a = embedder.embed("same text").await.unwrap();
        let b = embedder.embed("same text").await.unwrap();
        let c = embedder.embed("other text").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "unit-normalized");
    }

    #[test]
    fn recognized_model_dimensions() {
        assert_eq!(known_dimensions("text-embedding-3-small"), 1536);
        assert_eq!(known_dimensions("text-embedding-3-large"), 3072);
        assert_eq!(known_dimensions("text-embedding-ada-002"), 1536);
        assert_eq!(known_dimensions("nomic-embed-text"), 768);
        assert_eq!(known_dimensions("mxbai-embed-large"), 1024);
    }

    #[test]
    fn unknown_model_defaults_to_1536() {
        assert_eq!(known_dimensions("some-future-model"), 1536);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = EmbedderConfig {
            provider: "carrier-pigeon".into(),
            ..EmbedderConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }
}
