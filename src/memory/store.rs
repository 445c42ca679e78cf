//! Write and read paths over the memories and history tables.
//!
//! [`MemoryStore`] is a single-writer facade over one SQLite connection.
//! Mutations run inside a transaction: the memory row and its history row
//! land together. Deduplication is by content hash over live rows; deletes
//! are soft; history is append-only.

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use sha2::{Digest, Sha256};
use std::path::Path;

use super::search;
use super::types::{
    AddOutcome, HistoryAction, ListOptions, Memory, MemoryFilter, MemoryHistoryItem, Owner,
};
use crate::error::{MemoryError, Result};
use crate::vector::vec_to_blob;

/// Lowercase SHA-256 of the trimmed, case-folded text.
///
/// Two texts that differ only in surrounding whitespace or letter case
/// hash identically and deduplicate against each other.
pub fn content_hash(text: &str) -> String {
    let canonical = text.trim().to_lowercase();
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{digest:x}")
}

/// Validate an id-shaped argument. Ids are UUID strings; anything else is
/// rejected before touching the database.
fn validate_id(id: &str) -> Result<()> {
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| MemoryError::InvalidInput(format!("malformed memory id: {id}")))
}

pub struct MemoryStore {
    conn: Connection,
}

impl MemoryStore {
    /// Open (or create) the store at the given path. Initialization is
    /// idempotent: tables and indexes are created if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = crate::db::open_database(path)?;
        Ok(Self { conn })
    }

    /// Open an in-memory store (tests, throwaway sessions).
    pub fn open_in_memory() -> Result<Self> {
        let conn = crate::db::open_in_memory()?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Insert a new memory, or return the existing live row when the
    /// content hash matches (idempotent add — no history row is written
    /// for the duplicate case).
    pub fn add(
        &mut self,
        text: &str,
        owner: &Owner,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
        embedding: Option<&[f32]>,
    ) -> Result<AddOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MemoryError::InvalidInput("memory text is empty".into()));
        }
        let hash = content_hash(text);

        let tx = self.conn.transaction()?;

        if let Some(existing) = find_live_by_hash(&tx, &hash)? {
            tx.commit()?;
            tracing::debug!(id = %existing.id, "add deduplicated against existing memory");
            return Ok(AddOutcome {
                memory: existing,
                deduplicated: true,
            });
        }

        let id = uuid::Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let metadata_json = metadata
            .as_ref()
            .map(|m| serde_json::to_string(m))
            .transpose()?;
        let embedding_blob = embedding.map(vec_to_blob);

        tx.execute(
            "INSERT INTO memories (id, memory, hash, embedding, metadata, user_id, agent_id, run_id, created_at, updated_at, is_deleted) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, 0)",
            params![
                id,
                text,
                hash,
                embedding_blob,
                metadata_json,
                owner.user_id,
                owner.agent_id,
                owner.run_id,
                now,
            ],
        )?;

        write_history(&tx, &id, HistoryAction::Add, None, Some(text), &now)?;

        tx.commit()?;
        tracing::info!(id = %id, has_embedding = embedding.is_some(), "memory added");

        let memory = get_live(&self.conn, &id)?;
        Ok(AddOutcome {
            memory,
            deduplicated: false,
        })
    }

    /// Fetch a live memory by id.
    pub fn get(&self, id: &str) -> Result<Memory> {
        validate_id(id)?;
        get_live(&self.conn, id)
    }

    /// Rewrite a live memory's text, recompute its hash, shallow-merge the
    /// metadata, and append an UPDATE history row. `embedding` of `None`
    /// leaves the stored vector untouched (the regeneration-failed path).
    pub fn update(
        &mut self,
        id: &str,
        text: &str,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
        embedding: Option<&[f32]>,
    ) -> Result<()> {
        validate_id(id)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(MemoryError::InvalidInput("memory text is empty".into()));
        }
        let hash = content_hash(text);

        let tx = self.conn.transaction()?;
        let old = get_live(&tx, id)?;
        let now = chrono::Utc::now().to_rfc3339();

        // Shallow merge: provided keys overwrite, everything else is kept
        let merged = match (old.metadata.clone(), metadata) {
            (Some(serde_json::Value::Object(mut existing)), Some(provided)) => {
                existing.extend(provided);
                Some(serde_json::Value::Object(existing))
            }
            (None, Some(provided)) => Some(serde_json::Value::Object(provided)),
            (existing, None) => existing,
            (_, Some(provided)) => Some(serde_json::Value::Object(provided)),
        };
        let metadata_json = merged.map(|m| serde_json::to_string(&m)).transpose()?;

        match embedding {
            Some(vector) => {
                tx.execute(
                    "UPDATE memories SET memory = ?1, hash = ?2, metadata = ?3, embedding = ?4, updated_at = ?5 WHERE id = ?6",
                    params![text, hash, metadata_json, vec_to_blob(vector), now, id],
                )?;
            }
            None => {
                tx.execute(
                    "UPDATE memories SET memory = ?1, hash = ?2, metadata = ?3, updated_at = ?4 WHERE id = ?5",
                    params![text, hash, metadata_json, now, id],
                )?;
            }
        }

        write_history(&tx, id, HistoryAction::Update, Some(&old.memory), Some(text), &now)?;

        tx.commit()?;
        tracing::info!(id = %id, "memory updated");
        Ok(())
    }

    /// Soft-delete a live memory and append a DELETE history row.
    pub fn delete(&mut self, id: &str) -> Result<()> {
        validate_id(id)?;

        let tx = self.conn.transaction()?;
        let old = get_live(&tx, id)?;
        let now = chrono::Utc::now().to_rfc3339();

        tx.execute(
            "UPDATE memories SET is_deleted = 1, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;

        write_history(&tx, id, HistoryAction::Delete, Some(&old.memory), None, &now)?;

        tx.commit()?;
        tracing::info!(id = %id, "memory deleted");
        Ok(())
    }

    /// List live memories matching the filter, newest first.
    pub fn list(&self, options: &ListOptions) -> Result<Vec<Memory>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, memory, hash, metadata, user_id, agent_id, run_id, created_at, updated_at \
             FROM memories \
             WHERE is_deleted = 0 \
               AND (?1 IS NULL OR user_id = ?1) \
               AND (?2 IS NULL OR agent_id = ?2) \
             ORDER BY created_at DESC, id DESC \
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                params![
                    options.filter.user_id,
                    options.filter.agent_id,
                    options.limit as i64
                ],
                map_memory_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Live history rows for one memory, most recent first.
    pub fn history(&self, id: &str) -> Result<Vec<MemoryHistoryItem>> {
        validate_id(id)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, memory_id, previous_value, new_value, action, created_at, updated_at \
             FROM memory_history \
             WHERE memory_id = ?1 AND is_deleted = 0 \
             ORDER BY id DESC",
        )?;
        let rows = stmt
            .query_map(params![id], |row| {
                let action: String = row.get(4)?;
                Ok(MemoryHistoryItem {
                    id: row.get(0)?,
                    memory_id: row.get(1)?,
                    previous_value: row.get(2)?,
                    new_value: row.get(3)?,
                    action: action.parse().unwrap_or(HistoryAction::Add),
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Hard-wipe both tables. Irreversible.
    pub fn reset(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM memory_history", [])?;
        tx.execute("DELETE FROM memories", [])?;
        // Restart the history autoincrement counter; the sequence table
        // only exists once an AUTOINCREMENT row has been written
        let _ = tx.execute(
            "DELETE FROM sqlite_sequence WHERE name = 'memory_history'",
            [],
        );
        tx.commit()?;
        tracing::warn!("memory store reset: all rows wiped");
        Ok(())
    }

    /// Hybrid vector+text search. See [`search::search_hybrid`].
    pub fn search_hybrid(
        &self,
        query_text: &str,
        query_vector: &[f32],
        options: &super::types::SearchOptions,
    ) -> Result<Vec<Memory>> {
        search::search_hybrid(&self.conn, query_text, query_vector, options)
    }

    /// Substring-match search used when no embedder is available.
    pub fn search_text(
        &self,
        query_text: &str,
        options: &super::types::SearchOptions,
    ) -> Result<Vec<Memory>> {
        search::search_text(&self.conn, query_text, options)
    }

    /// Near-duplicate lookup by embedding similarity.
    pub fn find_similar(
        &self,
        embedding: &[f32],
        filter: &MemoryFilter,
        threshold: f64,
        exclude_id: Option<&str>,
    ) -> Result<Vec<Memory>> {
        search::find_similar(&self.conn, embedding, filter, threshold, exclude_id)
    }
}

/// Fetch a live row by id, mapping absence to `NotFound`.
fn get_live(conn: &Connection, id: &str) -> Result<Memory> {
    conn.query_row(
        "SELECT id, memory, hash, metadata, user_id, agent_id, run_id, created_at, updated_at \
         FROM memories WHERE id = ?1 AND is_deleted = 0",
        params![id],
        map_memory_row,
    )
    .optional()?
    .ok_or_else(|| MemoryError::NotFound(id.to_string()))
}

fn find_live_by_hash(conn: &Connection, hash: &str) -> Result<Option<Memory>> {
    Ok(conn
        .query_row(
            "SELECT id, memory, hash, metadata, user_id, agent_id, run_id, created_at, updated_at \
             FROM memories WHERE hash = ?1 AND is_deleted = 0",
            params![hash],
            map_memory_row,
        )
        .optional()?)
}

/// Row mapper for the nine-column memory projection shared by all read
/// paths (search adds a trailing score column via
/// [`map_scored_memory_row`]).
pub(crate) fn map_memory_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let metadata_str: Option<String> = row.get(3)?;
    Ok(Memory {
        id: row.get(0)?,
        memory: row.get(1)?,
        hash: row.get(2)?,
        metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
        user_id: row.get(4)?,
        agent_id: row.get(5)?,
        run_id: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        score: None,
    })
}

pub(crate) fn map_scored_memory_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let mut memory = map_memory_row(row)?;
    memory.score = Some(row.get::<_, f64>(9)?);
    Ok(memory)
}

/// Append one history row inside the caller's transaction.
fn write_history(
    tx: &Transaction<'_>,
    memory_id: &str,
    action: HistoryAction,
    previous_value: Option<&str>,
    new_value: Option<&str>,
    now: &str,
) -> Result<()> {
    tx.execute(
        "INSERT INTO memory_history (memory_id, previous_value, new_value, action, created_at, updated_at, is_deleted) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0)",
        params![memory_id, previous_value, new_value, action.as_str(), now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> MemoryStore {
        MemoryStore::open_in_memory().unwrap()
    }

    fn owner() -> Owner {
        Owner::user("u1")
    }

    #[test]
    fn content_hash_is_case_and_whitespace_insensitive() {
        assert_eq!(content_hash("My name is John"), content_hash("  my name is JOHN  "));
        assert_ne!(content_hash("My name is John"), content_hash("My name is Jane"));
    }

    #[test]
    fn add_then_get_round_trips() {
        let mut store = test_store();
        let outcome = store.add("  I like espresso  ", &owner(), None, None).unwrap();
        assert!(!outcome.deduplicated);
        assert_eq!(outcome.memory.memory, "I like espresso");

        let fetched = store.get(&outcome.memory.id).unwrap();
        assert_eq!(fetched.memory, "I like espresso");
        assert_eq!(fetched.user_id.as_deref(), Some("u1"));
        assert_eq!(fetched.created_at, fetched.updated_at);
    }

    #[test]
    fn add_rejects_empty_text() {
        let mut store = test_store();
        let err = store.add("   ", &owner(), None, None).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
    }

    #[test]
    fn add_deduplicates_on_content_hash() {
        let mut store = test_store();
        let first = store.add("My name is John", &owner(), None, None).unwrap();
        let second = store.add("my name is JOHN  ", &owner(), None, None).unwrap();

        assert!(second.deduplicated);
        assert_eq!(first.memory.id, second.memory.id);

        let all = store.list(&ListOptions::default()).unwrap();
        assert_eq!(all.len(), 1);

        // Only the original ADD is in history
        let history = store.history(&first.memory.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, HistoryAction::Add);
    }

    #[test]
    fn update_rewrites_text_hash_and_history() {
        let mut store = test_store();
        let added = store.add("My name is John", &owner(), None, None).unwrap();
        let id = added.memory.id.clone();

        store.update(&id, "My name is Tony", None, None).unwrap();

        let updated = store.get(&id).unwrap();
        assert_eq!(updated.memory, "My name is Tony");
        assert_eq!(updated.hash, content_hash("My name is Tony"));
        assert!(updated.updated_at >= updated.created_at);

        let history = store.history(&id).unwrap();
        assert_eq!(history.len(), 2);
        // Most recent first
        assert_eq!(history[0].action, HistoryAction::Update);
        assert_eq!(history[0].previous_value.as_deref(), Some("My name is John"));
        assert_eq!(history[0].new_value.as_deref(), Some("My name is Tony"));
        assert_eq!(history[1].action, HistoryAction::Add);
        assert!(history[1].previous_value.is_none());
    }

    #[test]
    fn update_merges_metadata_shallowly() {
        let mut store = test_store();
        let mut initial = serde_json::Map::new();
        initial.insert("color".into(), serde_json::json!("blue"));
        initial.insert("city".into(), serde_json::json!("Lisbon"));
        let added = store
            .add("Likes hiking", &owner(), Some(initial), None)
            .unwrap();

        let mut patch = serde_json::Map::new();
        patch.insert("color".into(), serde_json::json!("green"));
        patch.insert("sport".into(), serde_json::json!("climbing"));
        store
            .update(&added.memory.id, "Likes hiking and climbing", Some(patch), None)
            .unwrap();

        let merged = store.get(&added.memory.id).unwrap().metadata.unwrap();
        assert_eq!(merged["color"], "green");
        assert_eq!(merged["city"], "Lisbon");
        assert_eq!(merged["sport"], "climbing");
    }

    #[test]
    fn update_missing_is_not_found() {
        let mut store = test_store();
        let ghost = uuid::Uuid::now_v7().to_string();
        let err = store.update(&ghost, "text", None, None).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn malformed_id_is_invalid_input() {
        let mut store = test_store();
        assert!(matches!(
            store.get("not-a-uuid").unwrap_err(),
            MemoryError::InvalidInput(_)
        ));
        assert!(matches!(
            store.delete("not-a-uuid").unwrap_err(),
            MemoryError::InvalidInput(_)
        ));
    }

    #[test]
    fn delete_is_soft_and_terminal() {
        let mut store = test_store();
        let added = store.add("Temporary fact", &owner(), None, None).unwrap();
        let id = added.memory.id.clone();

        store.delete(&id).unwrap();

        assert!(store.get(&id).unwrap_err().is_not_found());
        assert!(store.list(&ListOptions::default()).unwrap().is_empty());
        // Double delete is NotFound
        assert!(store.delete(&id).unwrap_err().is_not_found());

        // History survives the delete
        let history = store.history(&id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, HistoryAction::Delete);
        assert!(history[0].new_value.is_none());
    }

    #[test]
    fn re_add_after_delete_mints_new_id() {
        let mut store = test_store();
        let first = store.add("Recurring fact", &owner(), None, None).unwrap();
        store.delete(&first.memory.id).unwrap();

        let second = store.add("Recurring fact", &owner(), None, None).unwrap();
        assert!(!second.deduplicated);
        assert_ne!(second.memory.id, first.memory.id);
        assert_eq!(second.memory.hash, first.memory.hash);
    }

    #[test]
    fn list_filters_by_owner_and_caps() {
        let mut store = test_store();
        store.add("fact for u1", &Owner::user("u1"), None, None).unwrap();
        store.add("fact for u2", &Owner::user("u2"), None, None).unwrap();

        let options = ListOptions {
            filter: MemoryFilter {
                user_id: Some("u1".into()),
                agent_id: None,
            },
            limit: 100,
        };
        let rows = store.list(&options).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].memory, "fact for u1");

        let capped = store
            .list(&ListOptions {
                filter: MemoryFilter::default(),
                limit: 1,
            })
            .unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn reset_wipes_everything() {
        let mut store = test_store();
        let added = store.add("Wiped fact", &owner(), None, None).unwrap();
        store.reset().unwrap();

        assert!(store.list(&ListOptions::default()).unwrap().is_empty());
        assert!(store.history(&added.memory.id).unwrap().is_empty());
    }

    #[test]
    fn add_stores_embedding_blob() {
        let mut store = test_store();
        let vector = vec![1.0f32, 0.0, 0.0];
        let added = store
            .add("Vectorized fact", &owner(), None, Some(&vector))
            .unwrap();

        let blob: Vec<u8> = store
            .conn()
            .query_row(
                "SELECT embedding FROM memories WHERE id = ?1",
                params![added.memory.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(crate::vector::blob_to_vec(&blob).unwrap(), vector);
    }
}
