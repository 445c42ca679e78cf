//! Core memory type definitions.
//!
//! Defines [`Memory`] (a stored fact), [`HistoryAction`] and
//! [`MemoryHistoryItem`] (the audit trail), [`Owner`] scoping, and the
//! option/response types for list and search operations.

use serde::{Deserialize, Serialize};

/// Owner identifiers that scope a memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub run_id: Option<String>,
}

impl Owner {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// True when no identifier is set.
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.agent_id.is_none() && self.run_id.is_none()
    }
}

/// A memory record, matching the `memories` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    /// The textual fact, trimmed.
    pub memory: String,
    /// Lowercase SHA-256 of the trimmed, case-folded text.
    pub hash: String,
    /// Arbitrary JSON metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// ISO 8601 last-modification timestamp.
    pub updated_at: String,
    /// Blended relevance score, present on search results only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// The three observable mutations recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryAction {
    Add,
    Update,
    Delete,
}

impl HistoryAction {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HistoryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(Self::Add),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            _ => Err(format!("unknown history action: {s}")),
        }
    }
}

/// One row of a memory's mutation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHistoryItem {
    pub id: i64,
    pub memory_id: String,
    pub previous_value: Option<String>,
    pub new_value: Option<String>,
    pub action: HistoryAction,
    pub created_at: String,
    pub updated_at: String,
}

/// Filters for list and search operations.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
}

impl MemoryFilter {
    pub fn for_owner(owner: &Owner) -> Self {
        Self {
            user_id: owner.user_id.clone(),
            agent_id: owner.agent_id.clone(),
        }
    }
}

/// Options for `list`. Default limit is 100.
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub filter: MemoryFilter,
    pub limit: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            filter: MemoryFilter::default(),
            limit: 100,
        }
    }
}

/// Options for `search`. Default limit 10, default threshold 0.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub filter: MemoryFilter,
    pub limit: usize,
    /// Minimum blended score in `[0, 1]`.
    pub threshold: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            filter: MemoryFilter::default(),
            limit: 10,
            threshold: 0.0,
        }
    }
}

/// How a search was ultimately executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Blended vector + text scoring.
    Hybrid,
    /// Substring matching only (no embedder, or vector path degraded).
    TextOnly,
}

/// Search results plus the diagnostic describing how they were produced.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<Memory>,
    pub mode: SearchMode,
    /// Set when the vector path failed and the call fell back to text
    /// search.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

/// Result returned from an add operation.
#[derive(Debug, Clone, Serialize)]
pub struct AddOutcome {
    pub memory: Memory,
    /// `true` if an identical live memory already existed and was returned
    /// unchanged.
    pub deduplicated: bool,
}
