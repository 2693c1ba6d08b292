//! End-to-end learn / ask / batch tests over the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;

use lattice::{AskOptions, EventType, LatticeError, LearnOptions, MemoryGraphStore};

use crate::mocks::{
    capture, next_event, pipeline_on, pipeline_with, ALICE_ACME, BOB_TECHCORP,
};

fn permissive_ask() -> AskOptions {
    AskOptions {
        min_similarity: Some(0.0),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_learn_writes_entities_relationships_and_document() {
    let pipeline = pipeline_with(&[ALICE_ACME]);
    let result = pipeline
        .learn("Alice is an engineer at Acme Corp.", &LearnOptions::default())
        .await
        .unwrap();

    assert_eq!(result.entities.len(), 2);
    assert_eq!(result.relationships.len(), 1);
    assert_eq!(result.entities_created, 2);
    assert_eq!(result.relationships_created, 1);
    assert_eq!(result.summary, "Alice works for Acme Corp.");
    assert!(result.entities.iter().all(|e| e.embedding.is_some()));

    let stats = pipeline.stats().await.unwrap();
    assert_eq!(stats.entity_count, 2);
    assert_eq!(stats.relationship_count, 1);
    assert_eq!(stats.document_count, 1);
}

#[tokio::test]
async fn test_learning_same_text_twice_is_idempotent() {
    let pipeline = pipeline_with(&[ALICE_ACME, ALICE_ACME]);
    let text = "Alice is an engineer at Acme Corp.";

    let first = pipeline.learn(text, &LearnOptions::default()).await.unwrap();
    let second = pipeline.learn(text, &LearnOptions::default()).await.unwrap();

    assert_eq!(first.entities_created, 2);
    assert_eq!(second.entities_created, 0);
    assert_eq!(second.relationships_created, 0);
    // Same stored nodes, same document.
    assert_eq!(first.document_id, second.document_id);

    let stats = pipeline.stats().await.unwrap();
    assert_eq!(stats.entity_count, 2);
    assert_eq!(stats.relationship_count, 1);
    assert_eq!(stats.document_count, 1);
}

#[tokio::test]
async fn test_unparsable_extraction_fails_learn_once() {
    let pipeline = pipeline_with(&["not json", "still not json"]);
    let mut failed = capture(pipeline.events(), EventType::LearnFailed);
    let mut completed = capture(pipeline.events(), EventType::LearnCompleted);

    let result = pipeline.learn("some text", &LearnOptions::default()).await;
    assert!(matches!(result, Err(LatticeError::Extraction(_))));

    let event = next_event(&mut failed).await;
    assert_eq!(event.event_type, EventType::LearnFailed);
    assert!(completed.try_recv().is_err());
    // Nothing was written.
    assert_eq!(pipeline.stats().await.unwrap().entity_count, 0);
}

#[tokio::test]
async fn test_ask_returns_grounded_answer() {
    let pipeline = pipeline_with(&[ALICE_ACME, "Alice works at Acme Corp as an engineer."]);
    pipeline
        .learn("Alice is an engineer at Acme Corp.", &LearnOptions::default())
        .await
        .unwrap();

    let answer = pipeline
        .ask("Where does Alice work?", &permissive_ask())
        .await
        .unwrap();

    assert_eq!(answer.answer, "Alice works at Acme Corp as an engineer.");
    assert!(answer.context.contains("Person: Alice"));
    assert!(answer.context.contains("Alice --[WORKS_FOR]--> Acme Corp"));
    assert!(!answer.entities.is_empty());
    assert_eq!(answer.relationships.len(), 1);
}

#[tokio::test]
async fn test_ask_with_no_seeds_returns_empty_context() {
    let pipeline = pipeline_with(&[ALICE_ACME, "I do not know."]);
    pipeline
        .learn("Alice is an engineer at Acme Corp.", &LearnOptions::default())
        .await
        .unwrap();

    let options = AskOptions {
        min_similarity: Some(0.99),
        ..Default::default()
    };
    let answer = pipeline
        .ask("completely unrelated question", &options)
        .await
        .unwrap();
    assert!(answer.context.is_empty());
    assert!(answer.entities.is_empty());
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let pipeline = pipeline_with(&[]);
    assert!(pipeline.ask("   ", &AskOptions::default()).await.is_err());
}

#[tokio::test]
async fn test_batch_isolates_failures_and_reports_summary() {
    // Item 1 is unparsable through the corrective retry; 0 and 2 succeed.
    let pipeline = pipeline_with(&[ALICE_ACME, "nope", "still nope", BOB_TECHCORP]);
    let mut progress = capture(pipeline.events(), EventType::BatchProgress);
    let mut completed = capture(pipeline.events(), EventType::BatchCompleted);

    let texts = vec![
        "Alice is an engineer at Acme Corp.".to_string(),
        "unusable text".to_string(),
        "Bob works at TechCorp.".to_string(),
    ];
    let summary = pipeline
        .learn_batch(&texts, &LearnOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.entities_created, 4);
    assert_eq!(summary.relationships_created, 2);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].index, 1);

    for expected in 1..=3 {
        let event = next_event(&mut progress).await;
        match event.payload {
            lattice::EventPayload::Batch(data) => {
                assert_eq!(data.completed, expected);
                assert_eq!(data.total, 3);
            }
            other => panic!("expected batch payload, got {other:?}"),
        }
    }
    next_event(&mut completed).await;
    assert!(completed.try_recv().is_err());
}

#[tokio::test]
async fn test_multi_entity_scenario() {
    let extraction = r#"{
        "entities": [
            {"type": "Person", "properties": {"name": "Alice"}},
            {"type": "Organization", "properties": {"name": "Acme Corp"}},
            {"type": "Person", "properties": {"name": "Bob"}},
            {"type": "Organization", "properties": {"name": "TechCorp"}}
        ],
        "relationships": [
            {"from": "Alice", "to": "Acme Corp", "type": "WORKS_FOR", "properties": {}},
            {"from": "Bob", "to": "TechCorp", "type": "WORKS_FOR", "properties": {}},
            {"from": "Alice", "to": "Bob", "type": "KNOWS", "properties": {}}
        ],
        "summary": "Alice and Bob work at Acme Corp and TechCorp and know each other."
    }"#;
    let pipeline = pipeline_with(&[extraction, "Bob works with Alice."]);
    let learned = pipeline
        .learn(
            "Alice works for Acme Corp. Bob works for TechCorp. Alice knows Bob.",
            &LearnOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(learned.entities.len(), 4);
    assert_eq!(learned.relationships.len(), 3);

    let answer = pipeline
        .ask("Who works with Alice?", &permissive_ask())
        .await
        .unwrap();
    assert!(answer.context.contains("Person: Alice"));
    assert!(answer.context.contains("Organization: Acme Corp"));
    assert!(answer.context.contains("Person: Bob"));
    assert!(answer.answer.contains("Bob"));
}

#[tokio::test]
async fn test_relationship_endpoints_resolve_against_stored_entities() {
    let follow_up = r#"{
        "entities": [
            {"type": "Person", "properties": {"name": "Bob"}}
        ],
        "relationships": [
            {"from": "Bob", "to": "Alice", "type": "KNOWS", "properties": {}},
            {"from": "Bob", "to": "Charlie", "type": "KNOWS", "properties": {}}
        ],
        "summary": "Bob knows Alice."
    }"#;
    let pipeline = pipeline_with(&[ALICE_ACME, follow_up]);
    pipeline
        .learn("Alice is an engineer at Acme Corp.", &LearnOptions::default())
        .await
        .unwrap();

    let second = pipeline
        .learn("Bob knows Alice.", &LearnOptions::default())
        .await
        .unwrap();

    // Alice exists from the first learn, so Bob's edge to her lands even
    // though she was not re-extracted; Charlie is unknown anywhere, so
    // that edge is dropped.
    assert_eq!(second.relationships.len(), 1);
    assert_eq!(second.relationships_created, 1);
    assert_eq!(second.relationships[0].rel_type, "KNOWS");
    assert_ne!(
        second.relationships[0].from_id,
        second.relationships[0].to_id
    );

    let stats = pipeline.stats().await.unwrap();
    assert_eq!(stats.entity_count, 3);
    assert_eq!(stats.relationship_count, 2);
}

#[tokio::test]
async fn test_scopes_are_isolated_on_a_shared_store() {
    let store = Arc::new(MemoryGraphStore::new());
    let team_a = pipeline_on(Arc::clone(&store), "team-a", &[ALICE_ACME]);
    let team_b = pipeline_on(Arc::clone(&store), "team-b", &["I do not know."]);

    team_a
        .learn("Alice is an engineer at Acme Corp.", &LearnOptions::default())
        .await
        .unwrap();

    let answer = team_b
        .ask("Where does Alice work?", &permissive_ask())
        .await
        .unwrap();
    assert!(answer.context.is_empty());
    assert_eq!(team_b.stats().await.unwrap().entity_count, 0);
    assert_eq!(team_a.stats().await.unwrap().entity_count, 2);
}

#[tokio::test]
async fn test_update_and_delete_entity() {
    let pipeline = pipeline_with(&[ALICE_ACME]);
    let learned = pipeline
        .learn("Alice is an engineer at Acme Corp.", &LearnOptions::default())
        .await
        .unwrap();
    let alice = learned
        .entities
        .iter()
        .find(|e| e.name() == Some("Alice"))
        .unwrap();

    let mut updated_events = capture(pipeline.events(), EventType::EntityUpdated);
    let mut properties = HashMap::new();
    properties.insert("role".to_string(), serde_json::json!("manager"));
    let updated = pipeline.update_entity(&alice.id, properties).await.unwrap();
    assert_eq!(
        updated.properties.get("role"),
        Some(&serde_json::json!("manager"))
    );
    next_event(&mut updated_events).await;

    let mut deleted_events = capture(pipeline.events(), EventType::EntityDeleted);
    assert!(pipeline.delete_entity(&alice.id).await.unwrap());
    next_event(&mut deleted_events).await;

    // Relationships involving the entity went with it.
    let stats = pipeline.stats().await.unwrap();
    assert_eq!(stats.entity_count, 1);
    assert_eq!(stats.relationship_count, 0);

    // Deleting again is a no-op.
    assert!(!pipeline.delete_entity(&alice.id).await.unwrap());
}
