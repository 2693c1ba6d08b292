//! In-process event bus for graph mutations and pipeline lifecycle.
//!
//! Observers subscribe per event type with [`EventBus::on`] /
//! [`EventBus::once`] and unsubscribe with [`EventBus::off`]. Emission is
//! fire-and-forget: the emitting call snapshots the matching handlers and
//! hands them to a background worker task, so a slow or panicking handler
//! never blocks or crashes the pipeline step that raised the event.
//!
//! Ordering: handlers for one event type run in registration order, and
//! events are delivered in emission order because a single worker drains
//! the queue.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::graph::{Document, Entity, Relationship};

/// The kinds of events the pipeline emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EntityCreated,
    EntityUpdated,
    EntityDeleted,
    RelationshipCreated,
    RelationshipUpdated,
    RelationshipDeleted,
    DocumentCreated,
    DocumentUpdated,
    DocumentDeleted,
    LearnStarted,
    LearnCompleted,
    LearnFailed,
    ExtractionStarted,
    ExtractionCompleted,
    QueryStarted,
    QueryCompleted,
    BatchProgress,
    BatchCompleted,
}

impl EventType {
    /// Get the event type as a dotted string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityCreated => "entity.created",
            Self::EntityUpdated => "entity.updated",
            Self::EntityDeleted => "entity.deleted",
            Self::RelationshipCreated => "relationship.created",
            Self::RelationshipUpdated => "relationship.updated",
            Self::RelationshipDeleted => "relationship.deleted",
            Self::DocumentCreated => "document.created",
            Self::DocumentUpdated => "document.updated",
            Self::DocumentDeleted => "document.deleted",
            Self::LearnStarted => "learn.started",
            Self::LearnCompleted => "learn.completed",
            Self::LearnFailed => "learn.failed",
            Self::ExtractionStarted => "extraction.started",
            Self::ExtractionCompleted => "extraction.completed",
            Self::QueryStarted => "query.started",
            Self::QueryCompleted => "query.completed",
            Self::BatchProgress => "batch.progress",
            Self::BatchCompleted => "batch.completed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Data carried by learn lifecycle events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearnEventData {
    /// Text length of the learned input.
    pub text_len: usize,
    /// Entities written (completed only).
    pub entities_written: usize,
    /// Relationships written (completed only).
    pub relationships_written: usize,
    /// Error message (failed only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Data carried by extraction lifecycle events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionEventData {
    /// Text length of the extracted input.
    pub text_len: usize,
    /// Candidate counts that survived filtering (completed only).
    pub entities: usize,
    pub relationships: usize,
}

/// Data carried by query lifecycle events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryEventData {
    /// The natural-language query.
    pub query: String,
    /// Seed entities matched (completed only).
    pub seeds: usize,
    /// Total subgraph entities used as context (completed only).
    pub context_entities: usize,
}

/// Data carried by batch progress/completion events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchEventData {
    /// Items finished so far (progress) or total processed (completed).
    pub completed: usize,
    /// Total items in the batch.
    pub total: usize,
    /// Items that succeeded so far.
    pub succeeded: usize,
    /// Items that failed so far.
    pub failed: usize,
    /// Entities created so far across the batch.
    pub entities_created: usize,
    /// Relationships created so far across the batch.
    pub relationships_created: usize,
    /// Estimated time remaining in milliseconds (progress only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_ms: Option<u64>,
}

/// The payload of an event, tagged by what caused it.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Entity(Entity),
    Relationship(Relationship),
    Document(Document),
    Learn(LearnEventData),
    Extraction(ExtractionEventData),
    Query(QueryEventData),
    Batch(BatchEventData),
}

/// A typed, timestamped record of a state change or lifecycle milestone.
///
/// Events have no identity beyond emission order; they are not persisted
/// or replayed.
#[derive(Debug, Clone)]
pub struct Event {
    /// What kind of event this is.
    pub event_type: EventType,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Scope the causing mutation or operation ran under.
    pub scope_id: String,
    /// The causing payload.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event stamped with the current time.
    pub fn new(event_type: EventType, scope_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            scope_id: scope_id.into(),
            payload,
        }
    }
}

/// Handler closure invoked for each delivered event.
pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;

/// Opaque identifier returned by [`EventBus::on`] / [`EventBus::once`],
/// used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct HandlerEntry {
    id: HandlerId,
    once: bool,
    handler: EventHandler,
}

/// In-process publish/subscribe bus with worker-task delivery.
pub struct EventBus {
    registry: RwLock<HashMap<EventType, Vec<HandlerEntry>>>,
    tx: mpsc::UnboundedSender<(Event, Vec<EventHandler>)>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a new event bus and spawn its delivery worker.
    ///
    /// Must be called within a tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_delivery_worker(rx));
        Self {
            registry: RwLock::new(HashMap::new()),
            tx,
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for an event type. Handlers for the same type
    /// are invoked in registration order.
    pub fn on(&self, event_type: EventType, handler: EventHandler) -> HandlerId {
        self.register(event_type, handler, false)
    }

    /// Register a handler that fires at most once. Deregistration is
    /// atomic with its first delivery scheduling, so back-to-back
    /// emissions cannot fire it twice.
    pub fn once(&self, event_type: EventType, handler: EventHandler) -> HandlerId {
        self.register(event_type, handler, true)
    }

    fn register(&self, event_type: EventType, handler: EventHandler, once: bool) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.registry.write();
        registry
            .entry(event_type)
            .or_default()
            .push(HandlerEntry { id, once, handler });
        id
    }

    /// Unsubscribe a handler. Returns true if it was registered.
    pub fn off(&self, event_type: EventType, id: HandlerId) -> bool {
        let mut registry = self.registry.write();
        if let Some(entries) = registry.get_mut(&event_type) {
            let before = entries.len();
            entries.retain(|e| e.id != id);
            return entries.len() < before;
        }
        false
    }

    /// Number of handlers currently registered for an event type.
    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.registry
            .read()
            .get(&event_type)
            .map_or(0, |entries| entries.len())
    }

    /// Emit an event. Returns immediately; handlers run on the delivery
    /// worker and their panics are logged, never propagated.
    pub fn emit(&self, event: Event) {
        let handlers = {
            let mut registry = self.registry.write();
            match registry.get_mut(&event.event_type) {
                Some(entries) => {
                    let handlers: Vec<EventHandler> =
                        entries.iter().map(|e| Arc::clone(&e.handler)).collect();
                    // Once-handlers are removed under the same lock that
                    // snapshots them, so a second emission cannot see them.
                    entries.retain(|e| !e.once);
                    handlers
                }
                None => Vec::new(),
            }
        };

        if handlers.is_empty() {
            debug!(event = %event.event_type, "no handlers registered");
            return;
        }

        if self.tx.send((event, handlers)).is_err() {
            warn!("event delivery worker is gone; dropping event");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_delivery_worker(mut rx: mpsc::UnboundedReceiver<(Event, Vec<EventHandler>)>) {
    while let Some((event, handlers)) = rx.recv().await {
        for handler in handlers {
            let result = catch_unwind(AssertUnwindSafe(|| handler(event.clone())));
            if result.is_err() {
                warn!(event = %event.event_type, "event handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc as tokio_mpsc;

    fn entity_event() -> Event {
        Event::new(
            EventType::EntityCreated,
            "s1",
            EventPayload::Entity(Entity::new("Person", "Alice", "s1")),
        )
    }

    async fn recv_tag(rx: &mut tokio_mpsc::UnboundedReceiver<&'static str>) -> &'static str {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for handler")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_handlers_fire_in_registration_order() {
        let bus = EventBus::new();
        let (tx, mut rx) = tokio_mpsc::unbounded_channel();

        let tx1 = tx.clone();
        bus.on(
            EventType::EntityCreated,
            Arc::new(move |_| {
                let _ = tx1.send("h1");
            }),
        );
        let tx2 = tx.clone();
        bus.on(
            EventType::EntityCreated,
            Arc::new(move |_| {
                let _ = tx2.send("h2");
            }),
        );

        bus.emit(entity_event());

        assert_eq!(recv_tag(&mut rx).await, "h1");
        assert_eq!(recv_tag(&mut rx).await, "h2");
    }

    #[tokio::test]
    async fn test_off_removes_handler() {
        let bus = EventBus::new();
        let (tx, mut rx) = tokio_mpsc::unbounded_channel();

        let tx1 = tx.clone();
        let h1 = bus.on(
            EventType::EntityCreated,
            Arc::new(move |_| {
                let _ = tx1.send("h1");
            }),
        );
        let tx2 = tx.clone();
        bus.on(
            EventType::EntityCreated,
            Arc::new(move |_| {
                let _ = tx2.send("h2");
            }),
        );

        assert!(bus.off(EventType::EntityCreated, h1));
        bus.emit(entity_event());

        assert_eq!(recv_tag(&mut rx).await, "h2");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_once_fires_exactly_once() {
        let bus = EventBus::new();
        let (tx, mut rx) = tokio_mpsc::unbounded_channel();

        let tx1 = tx.clone();
        bus.once(
            EventType::EntityCreated,
            Arc::new(move |_| {
                let _ = tx1.send("once");
            }),
        );

        // Back-to-back emissions before any delivery completes.
        bus.emit(entity_event());
        bus.emit(entity_event());

        assert_eq!(recv_tag(&mut rx).await, "once");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.handler_count(EventType::EntityCreated), 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_delivery() {
        let bus = EventBus::new();
        let (tx, mut rx) = tokio_mpsc::unbounded_channel();

        bus.on(
            EventType::EntityCreated,
            Arc::new(|_| panic!("handler blew up")),
        );
        let tx2 = tx.clone();
        bus.on(
            EventType::EntityCreated,
            Arc::new(move |_| {
                let _ = tx2.send("survivor");
            }),
        );

        bus.emit(entity_event());
        assert_eq!(recv_tag(&mut rx).await, "survivor");
    }

    #[tokio::test]
    async fn test_events_delivered_in_emission_order() {
        let bus = EventBus::new();
        let (tx, mut rx) = tokio_mpsc::unbounded_channel();

        let tx1 = tx.clone();
        bus.on(
            EventType::LearnStarted,
            Arc::new(move |_| {
                let _ = tx1.send("started");
            }),
        );
        let tx2 = tx.clone();
        bus.on(
            EventType::LearnCompleted,
            Arc::new(move |_| {
                let _ = tx2.send("completed");
            }),
        );

        bus.emit(Event::new(
            EventType::LearnStarted,
            "s1",
            EventPayload::Learn(LearnEventData::default()),
        ));
        bus.emit(Event::new(
            EventType::LearnCompleted,
            "s1",
            EventPayload::Learn(LearnEventData::default()),
        ));

        assert_eq!(recv_tag(&mut rx).await, "started");
        assert_eq!(recv_tag(&mut rx).await, "completed");
    }

    #[test]
    fn test_event_type_strings() {
        assert_eq!(EventType::EntityCreated.as_str(), "entity.created");
        assert_eq!(EventType::BatchProgress.as_str(), "batch.progress");
        assert_eq!(EventType::LearnFailed.to_string(), "learn.failed");
    }
}
