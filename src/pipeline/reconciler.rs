//! Memory reconciliation — the second LLM call and its operation plan.
//!
//! Given freshly extracted facts and a snapshot of the owner's current
//! memories, the model emits an ordered plan of ADD/UPDATE/DELETE/NONE
//! operations. This module owns the call, the strict response shape, and
//! the parse; the engine applies the plan against the store (the apply
//! loop needs embedding and locking orchestration that lives there).

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::llm::{accumulate, prompts::render_update_request, ChatBackend, ChatRequest};

const RECONCILE_TEMPERATURE: f32 = 0.1;
const RECONCILE_MAX_TOKENS: u32 = 2000;

/// The decision the model makes for one fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryEvent {
    Add,
    Update,
    Delete,
    None,
}

impl MemoryEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::None => "NONE",
        }
    }
}

/// One entry of the model's plan.
#[derive(Debug, Clone, Deserialize)]
pub struct PlannedOp {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    pub event: MemoryEvent,
    #[serde(default)]
    pub old_memory: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdatePayload {
    memory: Vec<PlannedOp>,
}

/// How one planned operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    /// The mutation (or NONE no-op) went through.
    Applied,
    /// Skipped by policy: unknown id, near-duplicate, missing text, or an
    /// already-deleted target.
    Skipped,
    /// The store rejected the mutation; reconciliation continued.
    Failed,
}

/// One executed (or skipped) operation, in plan order.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedOp {
    pub event: MemoryEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub status: OpStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AppliedOp {
    pub fn applied(op: &PlannedOp) -> Self {
        Self::with_status(op, OpStatus::Applied, None)
    }

    pub fn skipped(op: &PlannedOp, reason: impl Into<String>) -> Self {
        Self::with_status(op, OpStatus::Skipped, Some(reason.into()))
    }

    pub fn failed(op: &PlannedOp, reason: impl Into<String>) -> Self {
        Self::with_status(op, OpStatus::Failed, Some(reason.into()))
    }

    fn with_status(op: &PlannedOp, status: OpStatus, reason: Option<String>) -> Self {
        Self {
            event: op.event,
            id: op.id.clone(),
            text: op.text.clone(),
            status,
            reason,
        }
    }
}

/// Ask the model how the memory set should change.
///
/// `existing` is the `{id, text}` snapshot of the owner's current
/// memories. Returns the plan in model order; the caller applies it.
pub async fn plan_reconciliation(
    chat: &dyn ChatBackend,
    system_prompt: &str,
    existing: &[(String, String)],
    facts: &[String],
) -> Result<Vec<PlannedOp>> {
    let request = ChatRequest {
        system: system_prompt.to_string(),
        user: render_update_request(existing, facts),
        temperature: RECONCILE_TEMPERATURE,
        max_tokens: RECONCILE_MAX_TOKENS,
    };

    let stream = chat.stream_completion(&request).await?;
    let body = accumulate(stream).await?;

    let plan = parse_plan(&body);
    tracing::debug!(operations = plan.len(), "reconciliation planned");
    Ok(plan)
}

/// Parse `{"memory": [...]}` with the same brace-window recovery as the
/// extractor. An unparseable plan is an empty plan.
pub(crate) fn parse_plan(body: &str) -> Vec<PlannedOp> {
    let trimmed = body.trim();

    let payload = serde_json::from_str::<UpdatePayload>(trimmed)
        .ok()
        .or_else(|| {
            let start = trimmed.find('{')?;
            let end = trimmed.rfind('}')?;
            (end > start)
                .then(|| serde_json::from_str::<UpdatePayload>(&trimmed[start..=end]).ok())
                .flatten()
        });

    match payload {
        Some(parsed) => parsed.memory,
        None => {
            tracing::warn!(body_len = body.len(), "unparseable reconciliation response; empty plan");
            Vec::new()
        }
    }
}
