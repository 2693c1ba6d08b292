//! Event emission ordering and subscription semantics across a learn run.

use std::sync::Arc;

use lattice::{EventType, LearnOptions};

use crate::mocks::{pipeline_with, ALICE_ACME};

#[tokio::test]
async fn test_learn_emits_lifecycle_in_order() {
    let pipeline = pipeline_with(&[ALICE_ACME]);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    for event_type in [
        EventType::LearnStarted,
        EventType::ExtractionStarted,
        EventType::ExtractionCompleted,
        EventType::DocumentCreated,
        EventType::EntityCreated,
        EventType::RelationshipCreated,
        EventType::LearnCompleted,
    ] {
        let tx = tx.clone();
        pipeline.events().on(
            event_type,
            Arc::new(move |event| {
                let _ = tx.send(event.event_type);
            }),
        );
    }

    pipeline
        .learn("Alice is an engineer at Acme Corp.", &LearnOptions::default())
        .await
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..8 {
        let event_type = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed");
        seen.push(event_type);
    }
    assert_eq!(
        seen,
        vec![
            EventType::LearnStarted,
            EventType::ExtractionStarted,
            EventType::ExtractionCompleted,
            EventType::DocumentCreated,
            EventType::EntityCreated,
            EventType::EntityCreated,
            EventType::RelationshipCreated,
            EventType::LearnCompleted,
        ]
    );
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_once_subscription_sees_a_single_learn() {
    let pipeline = pipeline_with(&[ALICE_ACME, ALICE_ACME]);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    pipeline.events().once(
        EventType::LearnCompleted,
        Arc::new(move |_| {
            let _ = tx.send(());
        }),
    );

    let text = "Alice is an engineer at Acme Corp.";
    pipeline.learn(text, &LearnOptions::default()).await.unwrap();
    pipeline.learn(text, &LearnOptions::default()).await.unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(pipeline.events().handler_count(EventType::LearnCompleted), 0);
}

#[tokio::test]
async fn test_unsubscribed_handler_stops_receiving() {
    let pipeline = pipeline_with(&[ALICE_ACME]);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let id = pipeline.events().on(
        EventType::LearnStarted,
        Arc::new(move |_| {
            let _ = tx.send(());
        }),
    );
    assert!(pipeline.events().off(EventType::LearnStarted, id));

    pipeline
        .learn("Alice is an engineer at Acme Corp.", &LearnOptions::default())
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}
