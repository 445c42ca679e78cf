//! Read path — hybrid, text-only, and pure-vector queries.
//!
//! All shapes share one SQL skeleton: a subquery computes a per-row score,
//! the outer query filters on it, orders by score then recency, and caps
//! the result. Cosine distance comes from sqlite-vec's
//! `vec_distance_cosine` scalar; the query vector is always bound as a
//! parameter, never interpolated into the SQL text.

use rusqlite::{params, Connection};

use super::store::map_scored_memory_row;
use super::types::{Memory, MemoryFilter, SearchOptions};
use crate::error::{MemoryError, Result};
use crate::vector::vec_to_blob;

/// Weight of the cosine-similarity component in the blended score.
const VECTOR_WEIGHT: f64 = 0.7;
/// Weight of the substring-match component in the blended score.
const TEXT_WEIGHT: f64 = 0.3;
/// Text score for an exact substring match.
const EXACT_MATCH_SIM: f64 = 1.0;
/// Text score for a whitespace-token fuzzy match.
const FUZZY_MATCH_SIM: f64 = 0.8;
/// Row cap for near-duplicate lookups.
const FIND_SIMILAR_LIMIT: usize = 50;

const MEMORY_COLUMNS: &str =
    "id, memory, hash, metadata, user_id, agent_id, run_id, created_at, updated_at";

/// Blended vector + text search.
///
/// `score = 0.7·vec_sim + 0.3·text_sim` per live row. Rows without a
/// stored vector score on text alone; they are never excluded. Zero
/// scores carry no relevance signal and are dropped even at threshold 0.
/// A dimension mismatch between stored vectors and the query vector
/// surfaces as a `Backend` error, which the engine degrades to text-only
/// search.
pub fn search_hybrid(
    conn: &Connection,
    query_text: &str,
    query_vector: &[f32],
    options: &SearchOptions,
) -> Result<Vec<Memory>> {
    validate_query(query_text, options.threshold)?;

    let sql = format!(
        "SELECT {MEMORY_COLUMNS}, score FROM ( \
           SELECT {MEMORY_COLUMNS}, \
                  {VECTOR_WEIGHT} * (CASE WHEN embedding IS NOT NULL \
                       THEN MAX(0.0, 1.0 - vec_distance_cosine(embedding, ?1)) \
                       ELSE 0.0 END) \
                + {TEXT_WEIGHT} * (CASE WHEN memory LIKE ?2 ESCAPE '\\' THEN {EXACT_MATCH_SIM} \
                       WHEN memory LIKE ?3 ESCAPE '\\' THEN {FUZZY_MATCH_SIM} \
                       ELSE 0.0 END) AS score \
           FROM memories \
           WHERE is_deleted = 0 \
             AND (?4 IS NULL OR user_id = ?4) \
             AND (?5 IS NULL OR agent_id = ?5) \
         ) \
         WHERE score > 0.0 AND score >= ?6 \
         ORDER BY score DESC, created_at DESC \
         LIMIT ?7"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![
                vec_to_blob(query_vector),
                exact_pattern(query_text),
                fuzzy_pattern(query_text),
                options.filter.user_id,
                options.filter.agent_id,
                options.threshold,
                options.limit as i64,
            ],
            map_scored_memory_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Substring-match search, used when no query vector is available.
///
/// Exact `%query%` matches score 1.0 and rank ahead of the looser
/// `%w1%w2%…%` token matches at 0.8; recency breaks ties within a band.
pub fn search_text(
    conn: &Connection,
    query_text: &str,
    options: &SearchOptions,
) -> Result<Vec<Memory>> {
    validate_query(query_text, options.threshold)?;

    let sql = format!(
        "SELECT {MEMORY_COLUMNS}, score FROM ( \
           SELECT {MEMORY_COLUMNS}, \
                  CASE WHEN memory LIKE ?1 ESCAPE '\\' THEN {EXACT_MATCH_SIM} \
                       WHEN memory LIKE ?2 ESCAPE '\\' THEN {FUZZY_MATCH_SIM} \
                       ELSE 0.0 END AS score \
           FROM memories \
           WHERE is_deleted = 0 \
             AND (?3 IS NULL OR user_id = ?3) \
             AND (?4 IS NULL OR agent_id = ?4) \
         ) \
         WHERE score > 0.0 AND score >= ?5 \
         ORDER BY score DESC, created_at DESC \
         LIMIT ?6"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![
                exact_pattern(query_text),
                fuzzy_pattern(query_text),
                options.filter.user_id,
                options.filter.agent_id,
                options.threshold,
                options.limit as i64,
            ],
            map_scored_memory_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Pure-vector similarity lookup for near-duplicate detection.
///
/// Same skeleton as [`search_hybrid`] with `score = vec_sim`; rows
/// without a vector never clear a positive threshold.
pub fn find_similar(
    conn: &Connection,
    embedding: &[f32],
    filter: &MemoryFilter,
    threshold: f64,
    exclude_id: Option<&str>,
) -> Result<Vec<Memory>> {
    let sql = format!(
        "SELECT {MEMORY_COLUMNS}, score FROM ( \
           SELECT {MEMORY_COLUMNS}, \
                  CASE WHEN embedding IS NOT NULL \
                       THEN MAX(0.0, 1.0 - vec_distance_cosine(embedding, ?1)) \
                       ELSE 0.0 END AS score \
           FROM memories \
           WHERE is_deleted = 0 \
             AND (?2 IS NULL OR id != ?2) \
             AND (?3 IS NULL OR user_id = ?3) \
             AND (?4 IS NULL OR agent_id = ?4) \
         ) \
         WHERE score >= ?5 \
         ORDER BY score DESC, created_at DESC \
         LIMIT ?6"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![
                vec_to_blob(embedding),
                exclude_id,
                filter.user_id,
                filter.agent_id,
                threshold,
                FIND_SIMILAR_LIMIT as i64,
            ],
            map_scored_memory_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn validate_query(query_text: &str, threshold: f64) -> Result<()> {
    if query_text.trim().is_empty() {
        return Err(MemoryError::InvalidInput("search query is empty".into()));
    }
    if !(0.0..=1.0).contains(&threshold) {
        return Err(MemoryError::InvalidInput(format!(
            "threshold {threshold} is outside [0, 1]"
        )));
    }
    Ok(())
}

/// Escape LIKE wildcards in user text so queries match literally.
fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// `%query%` — the exact-substring pattern.
fn exact_pattern(query_text: &str) -> String {
    format!("%{}%", escape_like(query_text.trim()))
}

/// `%w1%w2%…%` — whitespace tokens joined by wildcards, so all words must
/// appear in order but not adjacently.
fn fuzzy_pattern(query_text: &str) -> String {
    let tokens: Vec<String> = query_text
        .split_whitespace()
        .map(escape_like)
        .collect();
    format!("%{}%", tokens.join("%"))
}
