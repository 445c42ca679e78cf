#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use mnemon::embedding::Embedder;
use mnemon::llm::MockChatBackend;
use mnemon::{MemoryConfig, MemoryEngine, Result};

static TRACING_INIT: Once = Once::new();

/// Route engine tracing to the test harness when MNEMON_LOG_LEVEL is set
/// (e.g. `MNEMON_LOG_LEVEL=debug cargo test -- --nocapture`). Safe to call
/// from every test; only the first call installs the subscriber.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        if let Ok(level) = std::env::var("MNEMON_LOG_LEVEL") {
            let filter = tracing_subscriber::EnvFilter::try_new(&level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_test_writer()
                .init();
        }
    });
}

/// An engine backed by a fresh on-disk database in a temp directory.
/// Returns the TempDir so the database outlives the test body.
pub fn test_engine() -> (MemoryEngine, tempfile::TempDir) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = MemoryConfig::default();
    config.storage.db_path = dir
        .path()
        .join("memory.db")
        .to_string_lossy()
        .into_owned();
    let engine = MemoryEngine::new(config).unwrap();
    (engine, dir)
}

/// Engine with the keyword embedder installed.
pub fn vector_engine() -> (MemoryEngine, tempfile::TempDir) {
    let (engine, dir) = test_engine();
    engine.set_embedder(Some(Arc::new(KeywordEmbedder)));
    (engine, dir)
}

/// Engine with a scripted chat backend installed (extraction response
/// first, then reconciliation response, in call order).
pub fn pipeline_engine(responses: Vec<String>) -> (MemoryEngine, tempfile::TempDir) {
    let (engine, dir) = vector_engine();
    engine.set_chat_backend(Some(Arc::new(MockChatBackend::new(responses))));
    (engine, dir)
}

/// Deterministic topic-axis embedder: texts about the same topic share a
/// unit vector, unrelated topics are orthogonal.
pub struct KeywordEmbedder;

fn topic_axis(text: &str) -> usize {
    let lower = text.to_lowercase();
    if lower.contains("espresso") || lower.contains("coffee") {
        0
    } else if lower.contains("color") || lower.contains("blue") {
        1
    } else if lower.contains("name") {
        2
    } else {
        3
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; 4];
        vector[topic_axis(text)] = 1.0;
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        4
    }

    fn model_id(&self) -> &str {
        "keyword-test"
    }
}

/// Embedder that works until [`ToggleEmbedder::fail_from_now_on`] is
/// called, then errors on every call — for degradation tests.
pub struct ToggleEmbedder {
    failing: AtomicBool,
}

impl ToggleEmbedder {
    pub fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
        }
    }

    pub fn fail_from_now_on(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for ToggleEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(mnemon::MemoryError::Embedding(
                "embedder switched off".into(),
            ));
        }
        KeywordEmbedder.embed(text).await
    }

    fn dimensions(&self) -> usize {
        4
    }

    fn model_id(&self) -> &str {
        "toggle-test"
    }
}
