//! Fact extraction — one LLM call turning a transcript into atomic facts.
//!
//! The model is asked for `{"facts": ["..."]}`. A response that fails to
//! parse yields an empty fact list rather than an error; only the call
//! itself failing is surfaced to the caller.

use serde::Deserialize;

use super::{render_transcript, ChatTurn};
use crate::llm::{accumulate, ChatBackend, ChatRequest};
use crate::error::Result;

const EXTRACTION_TEMPERATURE: f32 = 0.1;
const EXTRACTION_MAX_TOKENS: u32 = 1000;

#[derive(Debug, Deserialize)]
struct FactsPayload {
    facts: Vec<String>,
}

/// Extract atomic declarative facts from a conversation.
///
/// Returns the facts trimmed and filtered to non-empty strings; an
/// unparseable response is "no facts".
pub async fn extract_facts(
    chat: &dyn ChatBackend,
    system_prompt: &str,
    turns: &[ChatTurn],
) -> Result<Vec<String>> {
    let request = ChatRequest {
        system: system_prompt.to_string(),
        user: render_transcript(turns),
        temperature: EXTRACTION_TEMPERATURE,
        max_tokens: EXTRACTION_MAX_TOKENS,
    };

    let stream = chat.stream_completion(&request).await?;
    let body = accumulate(stream).await?;

    let facts = parse_facts(&body);
    tracing::debug!(count = facts.len(), "facts extracted");
    Ok(facts)
}

/// Parse `{"facts": [...]}` out of a model response.
///
/// Tries the trimmed body first; if that fails but an outer brace pair is
/// present (markdown fences, leading prose), re-parses the brace window
/// once. Anything still invalid yields an empty list.
pub(crate) fn parse_facts(body: &str) -> Vec<String> {
    let trimmed = body.trim();

    let payload = serde_json::from_str::<FactsPayload>(trimmed)
        .ok()
        .or_else(|| {
            let window = brace_window(trimmed)?;
            serde_json::from_str::<FactsPayload>(window).ok()
        });

    match payload {
        Some(parsed) => parsed
            .facts
            .iter()
            .map(|fact| fact.trim())
            .filter(|fact| !fact.is_empty())
            .map(str::to_string)
            .collect(),
        None => {
            tracing::warn!(body_len = body.len(), "unparseable extraction response; no facts");
            Vec::new()
        }
    }
}

/// The substring spanning the first `{` through the last `}`, if both
/// exist in order.
fn brace_window(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
