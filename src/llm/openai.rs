//! OpenAI-compatible SSE chat-completion provider.
//!
//! Sends a streaming `/chat/completions` request and yields the
//! `choices[0].delta.content` fragments as they arrive. Works against any
//! endpoint speaking the OpenAI wire format.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::collections::VecDeque;
use std::time::Duration;

use super::{ChatBackend, ChatRequest, TextStream};
use crate::config::LlmConfig;
use crate::error::{MemoryError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAiChat {
    client: Client,
    config: LlmConfig,
    api_key: Option<String>,
}

impl OpenAiChat {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MemoryError::Llm(format!("failed to create HTTP client: {e}")))?;

        let api_key = std::env::var(&config.api_key_env).ok();

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    async fn stream_completion(&self, request: &ChatRequest) -> Result<TextStream> {
        let payload = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
        });

        let mut builder = self
            .client
            .post(self.completions_url())
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .json(&payload)
            .send()
            .await
            .map_err(|e| MemoryError::Llm(format!("chat request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::Llm(format!(
                "chat request failed: HTTP {status} - {body}"
            )));
        }

        let state = SseState {
            inner: Box::pin(response.bytes_stream()),
            buffer: String::new(),
            pending: VecDeque::new(),
            done: false,
        };

        Ok(Box::pin(futures::stream::unfold(state, |mut state| async {
            loop {
                if let Some(fragment) = state.pending.pop_front() {
                    return Some((Ok(fragment), state));
                }
                if state.done {
                    return None;
                }
                match state.inner.next().await {
                    Some(Ok(bytes)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&bytes));
                        drain_sse_lines(&mut state);
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((
                            Err(MemoryError::Llm(format!("chat stream failed: {e}"))),
                            state,
                        ));
                    }
                    None => {
                        state.done = true;
                    }
                }
            }
        })))
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }
}

struct SseState {
    inner: std::pin::Pin<
        Box<dyn futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static>,
    >,
    buffer: String,
    pending: VecDeque<String>,
    done: bool,
}

/// Parse complete SSE lines out of the buffer, queueing text deltas.
/// Incomplete trailing lines stay buffered for the next network chunk.
fn drain_sse_lines(state: &mut SseState) {
    while let Some(newline) = state.buffer.find('\n') {
        let line: String = state.buffer.drain(..=newline).collect();
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            state.done = true;
            return;
        }
        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => {
                if let Some(content) = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                {
                    if !content.is_empty() {
                        state.pending.push_back(content);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping unparseable SSE chunk");
            }
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, serde::Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, serde::Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
