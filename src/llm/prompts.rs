//! Default system-prompt templates for the extraction pipeline.
//!
//! Both templates are overridable via [`crate::config::PromptConfig`]; the
//! JSON shape they request, not the prose, is the contract the parsers
//! enforce.

/// System prompt for the fact-extraction call. The model must answer with
/// `{"facts": ["...", ...]}`.
pub const DEFAULT_FACT_EXTRACTION_PROMPT: &str = r#"You are a personal information organizer. You will receive a conversation between a user and an assistant. Extract the facts worth remembering about the user and the people, places, preferences, and plans they mention.

Guidelines:
- Record each fact as one short, self-contained declarative sentence.
- Keep personal preferences, biographical details, plans, relationships, health notes, and professional details.
- Ignore small talk, assistant boilerplate, and anything already implied by another fact.
- Answer in the same language the user writes in.

Return only a JSON object of the form:
{"facts": ["fact 1", "fact 2"]}

If the conversation contains nothing worth remembering, return {"facts": []}.
Do not wrap the JSON in markdown fences or add commentary."#;

/// System prompt for the reconciliation call. The model compares newly
/// retrieved facts with existing memories and must answer with
/// `{"memory": [{"id": ..., "text": ..., "event": ..., "old_memory": ...}]}`.
pub const DEFAULT_MEMORY_UPDATE_PROMPT: &str = r#"You are a memory manager. You will receive the current list of stored memories (each with an id) and a list of newly extracted facts. Decide, for every fact, how the memory store should change.

For each decision emit one entry with an "event":
- "ADD": the fact is new. Omit "id"; put the fact in "text".
- "UPDATE": the fact supersedes or enriches an existing memory. Use that memory's "id", put the revised text in "text", and echo the prior text in "old_memory".
- "DELETE": the fact contradicts an existing memory that should be removed. Use that memory's "id".
- "NONE": the fact is already covered. Use the covering memory's "id".

Rules:
- Never invent ids; only use ids from the provided memory list.
- Prefer UPDATE over ADD when a fact refines an existing memory.
- When two facts conflict, the newly extracted fact wins.

Return only a JSON object of the form:
{"memory": [{"id": "...", "text": "...", "event": "UPDATE", "old_memory": "..."}]}

Do not wrap the JSON in markdown fences or add commentary."#;

/// Render the user message for the reconciliation call: the memory
/// snapshot and the new facts, both as JSON.
pub fn render_update_request(existing: &[(String, String)], facts: &[String]) -> String {
    let memories: Vec<serde_json::Value> = existing
        .iter()
        .map(|(id, text)| serde_json::json!({"id": id, "text": text}))
        .collect();
    format!(
        "Current memories:\n{}\n\nNewly extracted facts:\n{}",
        serde_json::to_string_pretty(&memories).unwrap_or_else(|_| "[]".to_string()),
        serde_json::to_string_pretty(facts).unwrap_or_else(|_| "[]".to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_request_embeds_both_lists() {
        let existing = vec![("id-1".to_string(), "User likes tea".to_string())];
        let facts = vec!["User likes coffee".to_string()];
        let rendered = render_update_request(&existing, &facts);
        assert!(rendered.contains("id-1"));
        assert!(rendered.contains("User likes tea"));
        assert!(rendered.contains("User likes coffee"));
    }

    #[test]
    fn update_request_with_no_memories() {
        let rendered = render_update_request(&[], &["A fact".to_string()]);
        assert!(rendered.contains("[]"));
        assert!(rendered.contains("A fact"));
    }
}
