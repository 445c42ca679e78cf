//! Embedded memory engine for conversational AI assistants.
//!
//! Mnemon ingests free-form facts drawn from conversations, deduplicates
//! them by content hash, indexes them by dense vector embedding and by
//! text, searches them by hybrid similarity, and tracks their mutation
//! history. An LLM pipeline extracts atomic facts from a dialogue and
//! reconciles them against the existing memory set.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   for cosine distance; soft-delete rows with an append-only history table
//! - **Search**: blended scoring, `0.7 · cosine_similarity + 0.3 · substring_match`,
//!   with automatic degradation to text-only matching
//! - **Embeddings**: any OpenAI-compatible endpoint behind the
//!   [`embedding::Embedder`] trait, fronted by a bounded TTL cache
//! - **Pipeline**: two chat-model calls — fact extraction, then
//!   ADD/UPDATE/DELETE/NONE reconciliation — applied best-effort
//!
//! # Example
//!
//! ```no_run
//! use mnemon::{MemoryConfig, MemoryEngine, Owner, SearchOptions};
//!
//! # async fn demo() -> mnemon::Result<()> {
//! let engine = MemoryEngine::new(MemoryConfig::load()?)?;
//!
//! engine.add("I take my espresso without sugar", Some(Owner::user("u1")), None).await?;
//!
//! let response = engine.search("espresso", SearchOptions::default()).await?;
//! for memory in &response.results {
//!     println!("{:.2}  {}", memory.score.unwrap_or(0.0), memory.memory);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`] — engine configuration, TOML loading, env overrides
//! - [`db`] — SQLite bootstrap, schema, migrations, health checks
//! - [`embedding`] — embedder trait, cache, batching, HTTP provider
//! - [`llm`] — chat backend trait, SSE provider, default prompts
//! - [`memory`] — store, hybrid search, core types
//! - [`pipeline`] — fact extraction and memory reconciliation
//! - [`engine`] — the public coordinator

pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod llm;
pub mod memory;
pub mod pipeline;
pub mod vector;

pub use config::{EmbedderConfig, LlmConfig, MemoryConfig, PromptConfig};
pub use engine::{MemoryEngine, TurnOutcome};
pub use error::{MemoryError, Result};
pub use memory::{
    HistoryAction, ListOptions, Memory, MemoryFilter, MemoryHistoryItem, MemoryStore, Owner,
    SearchMode, SearchOptions, SearchResponse,
};
pub use pipeline::reconciler::{AppliedOp, MemoryEvent, OpStatus};
pub use pipeline::{ChatRole, ChatTurn};
