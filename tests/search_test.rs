//! Search behavior through the engine: text-only fallback, hybrid
//! ranking, thresholds, and degradation when the vector path fails.

mod helpers;

use std::sync::Arc;

use helpers::{test_engine, vector_engine, ToggleEmbedder};
use mnemon::{MemoryError, Owner, SearchMode, SearchOptions};

fn u1() -> Option<Owner> {
    Some(Owner::user("u1"))
}

#[tokio::test]
async fn text_only_search_without_embedder() {
    let (engine, _dir) = test_engine();
    engine.add("I like espresso", u1(), None).await.unwrap();
    engine
        .add("My favorite color is blue", u1(), None)
        .await
        .unwrap();

    let response = engine
        .search("espresso", SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(response.mode, SearchMode::TextOnly);
    assert!(response.degraded_reason.is_none());
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].memory, "I like espresso");
    assert!(response.results[0].score.is_some());
}

#[tokio::test]
async fn hybrid_ranking_prefers_vector_and_text_agreement() {
    let (engine, _dir) = vector_engine();
    engine.add("I like espresso", u1(), None).await.unwrap();
    engine
        .add("My favorite color is blue", u1(), None)
        .await
        .unwrap();

    let response = engine
        .search("espresso", SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(response.mode, SearchMode::Hybrid);
    assert_eq!(response.results.len(), 1);
    let top = &response.results[0];
    assert_eq!(top.memory, "I like espresso");
    // aligned vector and exact substring: 0.7·1 + 0.3·1
    assert!((top.score.unwrap() - 1.0).abs() < 1e-6);
    // the color memory scores zero on both components and is dropped
    // even at the default threshold
}

#[tokio::test]
async fn hybrid_threshold_drops_low_scores() {
    let (engine, _dir) = vector_engine();
    engine.add("I like espresso", u1(), None).await.unwrap();
    engine
        .add("My favorite color is blue", u1(), None)
        .await
        .unwrap();

    let response = engine
        .search(
            "espresso",
            SearchOptions {
                threshold: 0.5,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].memory, "I like espresso");
}

#[tokio::test]
async fn search_scores_stay_in_unit_interval() {
    let (engine, _dir) = vector_engine();
    engine.add("I like espresso", u1(), None).await.unwrap();
    engine.add("espresso color swatch", u1(), None).await.unwrap();
    engine.add("unrelated note", u1(), None).await.unwrap();

    let response = engine
        .search("espresso", SearchOptions::default())
        .await
        .unwrap();
    for row in &response.results {
        let score = row.score.unwrap();
        assert!((0.0..=1.0).contains(&score), "score {score} out of range");
    }
}

#[tokio::test]
async fn exact_substring_guarantees_minimum_score() {
    let (engine, _dir) = vector_engine();
    // exact substring match pins text_sim at 1.0, so score ≥ 0.3 whatever
    // the vector component contributes
    engine
        .add("espresso-colored curtains", u1(), None)
        .await
        .unwrap();

    let response = engine
        .search("espresso", SearchOptions::default())
        .await
        .unwrap();
    let top = &response.results[0];
    assert!(top.score.unwrap() >= 0.3 - 1e-6);
}

#[tokio::test]
async fn query_time_embedding_failure_degrades_to_text() {
    let (engine, _dir) = test_engine();
    let toggle = Arc::new(ToggleEmbedder::new());
    engine.set_embedder(Some(toggle.clone()));

    engine.add("I like espresso", u1(), None).await.unwrap();

    toggle.fail_from_now_on();
    let response = engine
        .search("espresso drinks", SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(response.mode, SearchMode::TextOnly);
    assert!(response.degraded_reason.is_some());
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].memory, "I like espresso");
}

#[tokio::test]
async fn dimension_mismatch_degrades_to_text() {
    let (engine, _dir) = vector_engine();
    engine.add("I like espresso", u1(), None).await.unwrap();

    // Swap in an embedder of a different dimensionality; stored 4-dim
    // vectors no longer match the 8-dim query vector
    engine.set_embedder(Some(Arc::new(mnemon::embedding::MockEmbedder::new(8))));

    let response = engine
        .search("espresso", SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(response.mode, SearchMode::TextOnly);
    assert!(response.degraded_reason.is_some());
    assert_eq!(response.results.len(), 1);
}

#[tokio::test]
async fn search_rejects_bad_inputs() {
    let (engine, _dir) = vector_engine();
    assert!(matches!(
        engine.search("  ", SearchOptions::default()).await.unwrap_err(),
        MemoryError::InvalidInput(_)
    ));
    assert!(matches!(
        engine
            .search(
                "espresso",
                SearchOptions {
                    threshold: 2.0,
                    ..SearchOptions::default()
                },
            )
            .await
            .unwrap_err(),
        MemoryError::InvalidInput(_)
    ));
}

#[tokio::test]
async fn retrieve_relevant_returns_plain_memories() {
    let (engine, _dir) = vector_engine();
    engine.add("I like espresso", u1(), None).await.unwrap();

    let memories = engine
        .retrieve_relevant("espresso", SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].memory, "I like espresso");
}

#[tokio::test]
async fn search_respects_owner_filter() {
    let (engine, _dir) = vector_engine();
    engine
        .add("I like espresso", Some(Owner::user("u1")), None)
        .await
        .unwrap();
    engine
        .add("espresso is overrated", Some(Owner::user("u2")), None)
        .await
        .unwrap();

    let response = engine
        .search(
            "espresso",
            SearchOptions {
                filter: mnemon::MemoryFilter {
                    user_id: Some("u1".into()),
                    agent_id: None,
                },
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].user_id.as_deref(), Some("u1"));
}
