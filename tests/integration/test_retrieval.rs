//! Temporal and named-context filtering through the full ask path.

use chrono::{Duration, Utc};
use lattice::{AskOptions, LearnOptions};

use crate::mocks::{pipeline_with, ALICE_ACME, BOB_TECHCORP};

#[tokio::test]
async fn test_valid_at_excludes_expired_knowledge() {
    let pipeline = pipeline_with(&[ALICE_ACME, "I do not know.", "Alice worked at Acme Corp."]);
    let now = Utc::now();
    let options = LearnOptions {
        valid_to: Some(now - Duration::days(30)),
        ..Default::default()
    };
    pipeline
        .learn("Alice was an engineer at Acme Corp.", &options)
        .await
        .unwrap();

    // Asking about the present finds nothing.
    let current = pipeline
        .ask(
            "Where does Alice work?",
            &AskOptions {
                min_similarity: Some(0.0),
                valid_at: Some(now),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(current.context.is_empty());

    // Asking about the past still does.
    let past = pipeline
        .ask(
            "Where does Alice work?",
            &AskOptions {
                min_similarity: Some(0.0),
                valid_at: Some(now - Duration::days(60)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(past.context.contains("Person: Alice"));
}

#[tokio::test]
async fn test_context_tag_partitions_retrieval() {
    let pipeline = pipeline_with(&[
        ALICE_ACME,
        BOB_TECHCORP,
        "Alice works at Acme Corp.",
        "I do not know.",
    ]);
    pipeline
        .learn(
            "Alice is an engineer at Acme Corp.",
            &LearnOptions {
                context_tag: Some("handbook".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    pipeline
        .learn(
            "Bob works at TechCorp.",
            &LearnOptions {
                context_tag: Some("wiki".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let handbook = pipeline
        .ask(
            "Where does Alice work?",
            &AskOptions {
                min_similarity: Some(0.0),
                context_tag: Some("handbook".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(handbook.context.contains("Alice"));
    assert!(!handbook.context.contains("Bob"));

    let wiki = pipeline
        .ask(
            "Where does Alice work?",
            &AskOptions {
                min_similarity: Some(0.0),
                context_tag: Some("wiki".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!wiki.context.contains("Alice"));
}

#[tokio::test]
async fn test_top_k_and_max_nodes_overrides_bound_the_context() {
    let pipeline = pipeline_with(&[ALICE_ACME, "answer"]);
    pipeline
        .learn("Alice is an engineer at Acme Corp.", &LearnOptions::default())
        .await
        .unwrap();

    let answer = pipeline
        .ask(
            "Who is Alice?",
            &AskOptions {
                min_similarity: Some(0.0),
                top_k: Some(1),
                hop_limit: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    // One seed, no expansion: a single entity and no edges.
    assert_eq!(answer.entities.len(), 1);
    assert!(answer.relationships.is_empty());
}
