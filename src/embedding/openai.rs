//! OpenAI-compatible HTTP embedding provider.
//!
//! Talks to any `/embeddings` endpoint speaking the OpenAI wire format
//! (OpenAI itself, Ollama, LM Studio, vLLM). The API key is read from the
//! environment variable named in the config; endpoints that need no key
//! (local servers) work without one.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::Embedder;
use crate::config::EmbedderConfig;
use crate::error::{MemoryError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OpenAiEmbedder {
    client: Client,
    config: EmbedderConfig,
    api_key: Option<String>,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: EmbedderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MemoryError::Embedding(format!("failed to create HTTP client: {e}")))?;

        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::debug!(
                env = %config.api_key_env,
                "no API key in environment; sending unauthenticated requests"
            );
        }

        let dimensions = config.resolved_dimensions();

        Ok(Self {
            client,
            config,
            api_key,
            dimensions,
        })
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.config.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| MemoryError::Embedding("no embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: self.config.model.clone(),
            input: texts.iter().map(|s| s.to_string()).collect(),
        };

        let mut builder = self
            .client
            .post(self.embeddings_url())
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|e| MemoryError::Embedding(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::Embedding(format!(
                "embedding request failed: HTTP {status} - {body}"
            )));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::Embedding(format!("failed to parse response: {e}")))?;

        if result.data.len() != texts.len() {
            return Err(MemoryError::Embedding(format!(
                "provider returned {} embeddings for {} inputs",
                result.data.len(),
                texts.len()
            )));
        }

        // Sort by index to ensure correct order
        let mut embeddings: Vec<_> = result.data;
        embeddings.sort_by_key(|e| e.index);

        for data in &embeddings {
            if data.embedding.len() != self.dimensions {
                return Err(MemoryError::Embedding(format!(
                    "expected {}-dimensional vector, got {}",
                    self.dimensions,
                    data.embedding.len()
                )));
            }
        }

        Ok(embeddings.into_iter().map(|e| e.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, serde::Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}
