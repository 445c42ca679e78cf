//! The public coordinator over store, embedder, chat model, and pipeline.
//!
//! [`MemoryEngine`] owns the storage connection (created lazily, closed by
//! [`MemoryEngine::shutdown`]), the embedding cache, and the configured
//! capability clients. Public operations are async and suspend only on
//! SQL, embedding generation, and LLM calls; the store mutex is never held
//! across an embedding or LLM await.
//!
//! `process_turn` must not run concurrently for the same owner — callers
//! serialize reconciliation per owner.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::MemoryConfig;
use crate::db::{self, HealthReport};
use crate::embedding::batch::CachedEmbedder;
use crate::embedding::cache::EmbeddingCache;
use crate::embedding::{create_embedder, SharedEmbedder};
use crate::error::{MemoryError, Result};
use crate::llm::{create_chat_backend, SharedChatBackend};
use crate::llm::prompts::{DEFAULT_FACT_EXTRACTION_PROMPT, DEFAULT_MEMORY_UPDATE_PROMPT};
use crate::memory::types::{
    ListOptions, Memory, MemoryFilter, MemoryHistoryItem, Owner, SearchMode, SearchOptions,
    SearchResponse,
};
use crate::memory::MemoryStore;
use crate::pipeline::reconciler::{AppliedOp, MemoryEvent, PlannedOp};
use crate::pipeline::{extractor, reconciler, ChatTurn};

/// Reconciler ADDs are dropped when an existing memory is at least this
/// similar.
const NEAR_DUPLICATE_THRESHOLD: f64 = 0.95;

/// Snapshot size handed to the reconciliation prompt.
const RECONCILE_SNAPSHOT_LIMIT: usize = 100;

/// Result of one `process_turn` call.
#[derive(Debug, Serialize)]
pub struct TurnOutcome {
    /// Facts the extractor pulled from the transcript.
    pub facts: Vec<String>,
    /// Reconciliation operations in plan order, with their outcomes.
    pub operations: Vec<AppliedOp>,
}

struct EngineState {
    config: MemoryConfig,
    embedder: Option<SharedEmbedder>,
    chat: Option<SharedChatBackend>,
}

/// The memory engine's public API surface.
pub struct MemoryEngine {
    store: Mutex<Option<MemoryStore>>,
    state: RwLock<EngineState>,
    cache: Arc<EmbeddingCache>,
}

impl MemoryEngine {
    /// Create an engine from config. The database is not opened until the
    /// first operation touches it.
    pub fn new(config: MemoryConfig) -> Result<Self> {
        let cache = Arc::new(EmbeddingCache::default());
        let state = build_state(config, &cache)?;
        Ok(Self {
            store: Mutex::new(None),
            state: RwLock::new(state),
            cache,
        })
    }

    /// Replace the configuration atomically.
    ///
    /// Capability clients are rebuilt from the new descriptors. When the
    /// embedder model changes, existing stored vectors belong to the old
    /// space; they are kept but will not score against new query vectors.
    pub async fn configure(&self, config: MemoryConfig) -> Result<()> {
        let new_state = build_state(config, &self.cache)?;

        // Record the model descriptor while the store is open; a lazily
        // opened store records it on first use instead.
        {
            let guard = self.store.lock().await;
            if let Some(store) = guard.as_ref() {
                note_embedder_descriptor(store, &new_state.config)?;
            }
        }

        let mut state = self.state.write().expect("engine state lock poisoned");
        *state = new_state;
        tracing::info!("engine reconfigured");
        Ok(())
    }

    /// Close the storage connection. The next operation reopens it.
    pub async fn shutdown(&self) {
        let mut guard = self.store.lock().await;
        if guard.take().is_some() {
            tracing::info!("storage connection closed");
        }
    }

    /// Store a fact. Returns the inserted row, or the existing row
    /// unchanged when an identical live memory already exists.
    pub async fn add(
        &self,
        text: &str,
        owner: Option<Owner>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Memory> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MemoryError::InvalidInput("memory text is empty".into()));
        }
        let owner = self.resolve_owner(owner);

        // Embed before taking the store lock; failure degrades to a
        // vectorless row
        let embedding = self.try_embed(text).await;

        let mut guard = self.store_guard().await?;
        let store = guard.as_mut().expect("store initialized");
        let outcome = store.add(text, &owner, metadata, embedding.as_deref())?;
        Ok(outcome.memory)
    }

    /// Fetch one live memory by id.
    pub async fn get(&self, id: &str) -> Result<Memory> {
        let mut guard = self.store_guard().await?;
        guard.as_mut().expect("store initialized").get(id)
    }

    /// Rewrite a memory's text and merge metadata.
    pub async fn update(
        &self,
        id: &str,
        text: &str,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MemoryError::InvalidInput("memory text is empty".into()));
        }

        // A failed regeneration leaves the stored vector unchanged
        let embedding = self.try_embed(text).await;

        let mut guard = self.store_guard().await?;
        let store = guard.as_mut().expect("store initialized");
        store.update(id, text, metadata, embedding.as_deref())
    }

    /// Soft-delete a memory.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut guard = self.store_guard().await?;
        guard.as_mut().expect("store initialized").delete(id)
    }

    /// List live memories, newest first.
    pub async fn list(&self, options: ListOptions) -> Result<Vec<Memory>> {
        let mut guard = self.store_guard().await?;
        guard.as_mut().expect("store initialized").list(&options)
    }

    /// Mutation history for one memory, most recent first.
    pub async fn history(&self, id: &str) -> Result<Vec<MemoryHistoryItem>> {
        let mut guard = self.store_guard().await?;
        guard.as_mut().expect("store initialized").history(id)
    }

    /// Hard-wipe both tables. Irreversible.
    pub async fn reset(&self) -> Result<()> {
        let mut guard = self.store_guard().await?;
        guard.as_mut().expect("store initialized").reset()
    }

    /// Hybrid search with automatic degradation to text matching.
    ///
    /// With an embedder configured the query is embedded and scored as
    /// `0.7·vec_sim + 0.3·text_sim`; any failure on the vector path falls
    /// back to text search and is reported in the response diagnostic
    /// rather than failing the call.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(MemoryError::InvalidInput("search query is empty".into()));
        }
        if !(0.0..=1.0).contains(&options.threshold) {
            return Err(MemoryError::InvalidInput(format!(
                "threshold {} is outside [0, 1]",
                options.threshold
            )));
        }

        let embedder = self.embedder();
        let query_vector = match &embedder {
            Some(embedder) => match embedder.embed(query).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    tracing::warn!(error = %e, "query embedding failed; degrading to text search");
                    let mut guard = self.store_guard().await?;
                    let store = guard.as_mut().expect("store initialized");
                    let results = store.search_text(query, &options)?;
                    return Ok(SearchResponse {
                        results,
                        mode: SearchMode::TextOnly,
                        degraded_reason: Some(format!("query embedding failed: {e}")),
                    });
                }
            },
            None => None,
        };

        let mut guard = self.store_guard().await?;
        let store = guard.as_mut().expect("store initialized");

        match query_vector {
            Some(vector) => match store.search_hybrid(query, &vector, &options) {
                Ok(results) => Ok(SearchResponse {
                    results,
                    mode: SearchMode::Hybrid,
                    degraded_reason: None,
                }),
                Err(e @ MemoryError::InvalidInput(_)) => Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "vector search failed; degrading to text search");
                    let results = store.search_text(query, &options)?;
                    Ok(SearchResponse {
                        results,
                        mode: SearchMode::TextOnly,
                        degraded_reason: Some(format!("vector search failed: {e}")),
                    })
                }
            },
            None => {
                let results = store.search_text(query, &options)?;
                Ok(SearchResponse {
                    results,
                    mode: SearchMode::TextOnly,
                    degraded_reason: None,
                })
            }
        }
    }

    /// Search and return just the memories — the prompt-injection shape.
    pub async fn retrieve_relevant(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<Memory>> {
        Ok(self.search(query, options).await?.results)
    }

    /// Run the extraction & reconciliation pipeline over a conversation.
    ///
    /// One LLM call extracts facts; a second plans ADD/UPDATE/DELETE/NONE
    /// operations against the owner's current memories; the plan is
    /// applied best-effort in order. A reconciliation-call failure skips
    /// the whole plan (the facts are still returned); individual
    /// operation failures are recorded and do not abort the rest.
    pub async fn process_turn(
        &self,
        turns: &[ChatTurn],
        owner: Option<Owner>,
    ) -> Result<TurnOutcome> {
        let (chat, extraction_prompt, update_prompt) = {
            let state = self.state.read().expect("engine state lock poisoned");
            let chat = state
                .chat
                .clone()
                .ok_or(MemoryError::NotConfigured("chat model required"))?;
            let extraction = state
                .config
                .prompts
                .fact_extraction
                .clone()
                .unwrap_or_else(|| DEFAULT_FACT_EXTRACTION_PROMPT.to_string());
            let update = state
                .config
                .prompts
                .memory_update
                .clone()
                .unwrap_or_else(|| DEFAULT_MEMORY_UPDATE_PROMPT.to_string());
            (chat, extraction, update)
        };
        let owner = self.resolve_owner(owner);
        let filter = MemoryFilter::for_owner(&owner);

        let facts = extractor::extract_facts(chat.as_ref(), &extraction_prompt, turns).await?;
        if facts.is_empty() {
            tracing::debug!("no facts extracted; skipping reconciliation");
            return Ok(TurnOutcome {
                facts,
                operations: Vec::new(),
            });
        }

        // Snapshot the owner's memories for the prompt and for UPDATE
        // id validation
        let snapshot: Vec<(String, String)> = {
            let mut guard = self.store_guard().await?;
            let store = guard.as_mut().expect("store initialized");
            store
                .list(&ListOptions {
                    filter: filter.clone(),
                    limit: RECONCILE_SNAPSHOT_LIMIT,
                })?
                .into_iter()
                .map(|m| (m.id, m.memory))
                .collect()
        };

        let plan =
            match reconciler::plan_reconciliation(chat.as_ref(), &update_prompt, &snapshot, &facts)
                .await
            {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::warn!(error = %e, "reconciliation call failed; skipping this turn");
                    return Ok(TurnOutcome {
                        facts,
                        operations: Vec::new(),
                    });
                }
            };

        let snapshot_ids: HashSet<&str> = snapshot.iter().map(|(id, _)| id.as_str()).collect();
        let mut operations = Vec::with_capacity(plan.len());
        for op in plan {
            let outcome = self.apply_operation(&op, &owner, &filter, &snapshot_ids).await;
            operations.push(outcome);
        }

        Ok(TurnOutcome { facts, operations })
    }

    /// Storage health: schema version, integrity, row counts.
    pub async fn health(&self) -> Result<HealthReport> {
        let mut guard = self.store_guard().await?;
        let store = guard.as_mut().expect("store initialized");
        db::check_database_health(store.conn())
    }

    /// The shared embedding cache (process-lifetime, bounded).
    pub fn embedding_cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Inject an embedding provider, replacing whatever the config built.
    /// The provider is wrapped with the shared cache. `None` disables
    /// vector features.
    pub fn set_embedder(&self, embedder: Option<SharedEmbedder>) {
        let wrapped = embedder
            .map(|e| Arc::new(CachedEmbedder::new(e, self.cache.clone())) as SharedEmbedder);
        let mut state = self.state.write().expect("engine state lock poisoned");
        state.embedder = wrapped;
    }

    /// Inject a chat backend, replacing whatever the config built. `None`
    /// disables the extraction pipeline.
    pub fn set_chat_backend(&self, chat: Option<SharedChatBackend>) {
        let mut state = self.state.write().expect("engine state lock poisoned");
        state.chat = chat;
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    /// Apply one planned reconciliation operation. Never fails the caller;
    /// outcomes carry the per-operation status.
    async fn apply_operation(
        &self,
        op: &PlannedOp,
        owner: &Owner,
        filter: &MemoryFilter,
        snapshot_ids: &HashSet<&str>,
    ) -> AppliedOp {
        match op.event {
            MemoryEvent::Add => {
                let Some(text) = op.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
                else {
                    return AppliedOp::skipped(op, "missing text");
                };
                let embedding = self.try_embed(text).await;

                let mut guard = match self.store_guard().await {
                    Ok(guard) => guard,
                    Err(e) => return AppliedOp::failed(op, e.to_string()),
                };
                let store = guard.as_mut().expect("store initialized");

                // Near-duplicate gate: skip texts the store already holds
                // in slightly different words
                if let Some(vector) = &embedding {
                    match store.find_similar(vector, filter, NEAR_DUPLICATE_THRESHOLD, None) {
                        Ok(similar) if !similar.is_empty() => {
                            return AppliedOp::skipped(op, "near-duplicate of existing memory");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "near-duplicate check failed; adding anyway");
                        }
                    }
                }

                match store.add(text, owner, Some(owner_metadata(owner, None)), embedding.as_deref())
                {
                    Ok(outcome) => {
                        let mut applied = AppliedOp::applied(op);
                        applied.id = Some(outcome.memory.id);
                        applied
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "reconciler ADD failed");
                        AppliedOp::failed(op, e.to_string())
                    }
                }
            }
            MemoryEvent::Update => {
                let Some(id) = op.id.as_deref() else {
                    return AppliedOp::skipped(op, "missing id");
                };
                if !snapshot_ids.contains(id) {
                    return AppliedOp::skipped(op, "id not in memory snapshot");
                }
                let Some(text) = op.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
                else {
                    return AppliedOp::skipped(op, "missing text");
                };
                let embedding = self.try_embed(text).await;

                let mut guard = match self.store_guard().await {
                    Ok(guard) => guard,
                    Err(e) => return AppliedOp::failed(op, e.to_string()),
                };
                let store = guard.as_mut().expect("store initialized");
                let metadata = owner_metadata(owner, op.old_memory.as_deref());
                match store.update(id, text, Some(metadata), embedding.as_deref()) {
                    Ok(()) => AppliedOp::applied(op),
                    Err(e) => {
                        tracing::warn!(error = %e, id, "reconciler UPDATE failed");
                        AppliedOp::failed(op, e.to_string())
                    }
                }
            }
            MemoryEvent::Delete => {
                let Some(id) = op.id.as_deref() else {
                    return AppliedOp::skipped(op, "missing id");
                };
                let mut guard = match self.store_guard().await {
                    Ok(guard) => guard,
                    Err(e) => return AppliedOp::failed(op, e.to_string()),
                };
                let store = guard.as_mut().expect("store initialized");
                match store.delete(id) {
                    Ok(()) => AppliedOp::applied(op),
                    // Deleting something already gone is success enough
                    Err(e) if e.is_not_found() => AppliedOp::skipped(op, "not found"),
                    Err(e @ MemoryError::InvalidInput(_)) => {
                        AppliedOp::skipped(op, e.to_string())
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, id, "reconciler DELETE failed");
                        AppliedOp::failed(op, e.to_string())
                    }
                }
            }
            MemoryEvent::None => AppliedOp::applied(op),
        }
    }

    /// Lock the store, opening the connection on first use.
    async fn store_guard(&self) -> Result<MutexGuard<'_, Option<MemoryStore>>> {
        let mut guard = self.store.lock().await;
        if guard.is_none() {
            let config = {
                let state = self.state.read().expect("engine state lock poisoned");
                state.config.clone()
            };
            let store = MemoryStore::open(config.resolved_db_path())?;
            note_embedder_descriptor(&store, &config)?;
            *guard = Some(store);
        }
        Ok(guard)
    }

    /// Current embedder, if configured.
    fn embedder(&self) -> Option<SharedEmbedder> {
        self.state
            .read()
            .expect("engine state lock poisoned")
            .embedder
            .clone()
    }

    /// Embed text if an embedder is configured, recovering failure as
    /// `None` (the row is persisted without a vector).
    async fn try_embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder()?;
        match embedder.embed(text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed; continuing without vector");
                None
            }
        }
    }

    /// Fill an unspecified owner from the configured default user.
    fn resolve_owner(&self, owner: Option<Owner>) -> Owner {
        match owner {
            Some(owner) if !owner.is_empty() => owner,
            _ => {
                let state = self.state.read().expect("engine state lock poisoned");
                Owner {
                    user_id: state.config.default_user_id.clone(),
                    ..Owner::default()
                }
            }
        }
    }
}

fn build_state(config: MemoryConfig, cache: &Arc<EmbeddingCache>) -> Result<EngineState> {
    let embedder = match &config.embedder {
        Some(embedder_config) => {
            let provider = create_embedder(embedder_config)?;
            Some(Arc::new(CachedEmbedder::new(provider, cache.clone())) as SharedEmbedder)
        }
        None => None,
    };
    let chat = match &config.llm {
        Some(llm_config) => Some(create_chat_backend(llm_config)?),
        None => None,
    };
    Ok(EngineState {
        config,
        embedder,
        chat,
    })
}

/// Record the configured embedder in schema_meta, warning when it differs
/// from the model that wrote the existing vectors.
fn note_embedder_descriptor(store: &MemoryStore, config: &MemoryConfig) -> Result<()> {
    let Some(embedder_config) = &config.embedder else {
        return Ok(());
    };
    let conn = store.conn();
    let previous = db::migrations::get_embedding_model(conn)?;
    if let Some(previous_model) = &previous {
        if previous_model != &embedder_config.model {
            tracing::warn!(
                previous = %previous_model,
                current = %embedder_config.model,
                "embedding model changed; stored vectors belong to the old space"
            );
        }
    }
    db::migrations::set_embedding_model(conn, &embedder_config.model)?;
    db::migrations::set_embedding_dimensions(conn, embedder_config.resolved_dimensions())?;
    Ok(())
}

/// Owner identifiers echoed into metadata by the reconciler, plus the
/// superseded text on updates.
fn owner_metadata(
    owner: &Owner,
    old_memory: Option<&str>,
) -> serde_json::Map<String, serde_json::Value> {
    let mut metadata = serde_json::Map::new();
    if let Some(user_id) = &owner.user_id {
        metadata.insert("user_id".into(), serde_json::json!(user_id));
    }
    if let Some(agent_id) = &owner.agent_id {
        metadata.insert("agent_id".into(), serde_json::json!(agent_id));
    }
    if let Some(run_id) = &owner.run_id {
        metadata.insert("run_id".into(), serde_json::json!(run_id));
    }
    if let Some(old_memory) = old_memory {
        metadata.insert("old_memory".into(), serde_json::json!(old_memory));
    }
    metadata
}
