//! Cache-aware embedding wrapper with order-preserving batching.
//!
//! [`CachedEmbedder`] wraps any [`Embedder`]: single lookups go through the
//! cache, and batches are split into cache hits and misses, the misses
//! embedded in chunks of [`EMBED_CHUNK_SIZE`], and the results re-interleaved
//! in input order. For all inputs, `embed_batch(texts)[i]` equals
//! `embed(texts[i])`.

use async_trait::async_trait;
use std::sync::Arc;

use super::cache::EmbeddingCache;
use super::{Embedder, SharedEmbedder};
use crate::error::Result;

/// Miss chunks sent to the underlying provider per request.
pub const EMBED_CHUNK_SIZE: usize = 100;

pub struct CachedEmbedder {
    inner: SharedEmbedder,
    cache: Arc<EmbeddingCache>,
}

impl CachedEmbedder {
    pub fn new(inner: SharedEmbedder, cache: Arc<EmbeddingCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model_id = self.inner.model_id();
        if let Some(vector) = self.cache.get(text, model_id) {
            tracing::trace!(model = model_id, "embedding cache hit");
            return Ok(vector);
        }
        let vector = self.inner.embed(text).await?;
        self.cache.insert(text, model_id, vector.clone());
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let model_id = self.inner.model_id();
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_indices: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(text, model_id) {
                Some(vector) => results[i] = Some(vector),
                None => miss_indices.push(i),
            }
        }

        tracing::debug!(
            total = texts.len(),
            misses = miss_indices.len(),
            "embedding batch"
        );

        for chunk in miss_indices.chunks(EMBED_CHUNK_SIZE) {
            let chunk_texts: Vec<&str> = chunk.iter().map(|&i| texts[i]).collect();
            let vectors = self.inner.embed_batch(&chunk_texts).await?;
            for (&i, vector) in chunk.iter().zip(vectors) {
                self.cache.insert(texts[i], model_id, vector.clone());
                results[i] = Some(vector);
            }
        }

        // Every slot is filled: hits above, misses by the chunk loop
        Ok(results.into_iter().map(|v| v.unwrap()).collect())
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
