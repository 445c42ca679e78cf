//! Chat-completion capability for the extraction pipeline.
//!
//! The engine consumes chat models through the [`ChatBackend`] trait: a
//! two-message request (system + user) produces a text stream, which the
//! caller accumulates and parses. An OpenAI-compatible SSE provider ships
//! in [`openai`]; [`MockChatBackend`] supports hermetic tests.

pub mod openai;
pub mod prompts;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::{MemoryError, Result};

/// A streamed chat completion: text fragments in generation order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'static>>;

/// A two-message chat request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Trait for chat-completion providers.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Start a completion and return the text stream.
    async fn stream_completion(&self, request: &ChatRequest) -> Result<TextStream>;

    /// Model identifier, for logging.
    fn model_id(&self) -> &str;
}

/// A shared chat backend that can be used across tasks.
pub type SharedChatBackend = Arc<dyn ChatBackend>;

/// Drain a text stream into the full response body.
pub async fn accumulate(mut stream: TextStream) -> Result<String> {
    let mut body = String::new();
    while let Some(fragment) = stream.next().await {
        body.push_str(&fragment?);
    }
    Ok(body)
}

/// Create a chat backend from config.
///
/// Currently only `"openai"` is supported (any OpenAI-compatible
/// `/chat/completions` endpoint).
pub fn create_chat_backend(config: &LlmConfig) -> Result<SharedChatBackend> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(openai::OpenAiChat::new(config.clone())?)),
        other => Err(MemoryError::InvalidInput(format!(
            "unknown llm provider: {other}. Supported: openai"
        ))),
    }
}

/// Scripted chat backend for tests: returns canned responses in order,
/// each split into a few stream fragments.
pub struct MockChatBackend {
    responses: std::sync::Mutex<std::collections::VecDeque<String>>,
}

impl MockChatBackend {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
        }
    }

    /// Single canned response.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![text.into()])
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn stream_completion(&self, _request: &ChatRequest) -> Result<TextStream> {
        let body = self
            .responses
            .lock()
            .expect("mock backend poisoned")
            .pop_front()
            .ok_or_else(|| MemoryError::Llm("mock backend: no more responses".to_string()))?;

        // Split mid-body so accumulation over multiple fragments is exercised
        let mid = body.len() / 2;
        let split = (0..=mid)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        let (head, tail) = body.split_at(split);
        let fragments = vec![Ok(head.to_string()), Ok(tail.to_string())];
        Ok(Box::pin(futures::stream::iter(fragments)))
    }

    fn model_id(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accumulate_joins_fragments() {
        let backend = MockChatBackend::with_text("hello world");
        let request = ChatRequest {
            system: "sys".into(),
            user: "usr".into(),
            temperature: 0.1,
            max_tokens: 100,
        };
        let stream = backend.stream_completion(&request).await.unwrap();
        assert_eq!(accumulate(stream).await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn mock_exhaustion_is_an_error() {
        let backend = MockChatBackend::new(vec![]);
        let request = ChatRequest {
            system: String::new(),
            user: String::new(),
            temperature: 0.1,
            max_tokens: 10,
        };
        assert!(backend.stream_completion(&request).await.is_err());
    }
}
