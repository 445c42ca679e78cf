//! Error types for the memory engine.

use thiserror::Error;

/// Errors surfaced by public memory operations.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Caller supplied invalid input: empty text, a malformed id, or an
    /// out-of-range threshold. No side effects occurred.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The addressed memory does not exist or has been deleted.
    #[error("memory not found: {0}")]
    NotFound(String),

    /// The operation requires a capability that is not configured
    /// (embedder or chat model).
    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    /// Storage engine failure, propagated unchanged.
    #[error("storage error: {0}")]
    Backend(#[from] rusqlite::Error),

    /// Embedding generation failed.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Chat completion call or response handling failed.
    #[error("llm error: {0}")]
    Llm(String),

    /// JSON encoding/decoding of metadata failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;

impl MemoryError {
    /// True for the `NotFound` tag. The reconciler uses this to swallow
    /// deletes of ids that no longer exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MemoryError::NotFound(_))
    }
}
