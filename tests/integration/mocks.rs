//! Shared test doubles: a deterministic embedder and a scripted LLM.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;

use lattice::{
    Config, EmbeddingProvider, Event, EventBus, EventType, LlmProvider, MemoryGraphStore,
    Pipeline, ProviderError, Result,
};

static TRACING: Once = Once::new();

/// Route pipeline logs to the test harness, honoring `RUST_LOG`.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Embeds text as a bag-of-tokens count vector, each token hashed to one
/// dimension. Texts sharing words land near each other, so similarity
/// behaves plausibly without a real model.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { dims: 32 })
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            v[(hasher.finish() % self.dims as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// LLM stub replaying a fixed sequence of outputs, one per generate call.
pub struct ScriptedLlm {
    outputs: Mutex<VecDeque<String>>,
}

impl ScriptedLlm {
    pub fn new(outputs: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            outputs: Mutex::new(outputs.iter().map(|s| s.to_string()).collect()),
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(
        &self,
        _prompt: &str,
        _context: Option<&str>,
        _system: Option<&str>,
        _temperature: Option<f32>,
    ) -> Result<String> {
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::EmptyResponse.into())
    }
}

/// Extraction output for "Alice is an engineer at Acme Corp."
pub const ALICE_ACME: &str = r#"{
    "entities": [
        {"type": "Person", "properties": {"name": "Alice", "role": "engineer"}},
        {"type": "Organization", "properties": {"name": "Acme Corp"}}
    ],
    "relationships": [
        {"from": "Alice", "to": "Acme Corp", "type": "WORKS_FOR", "properties": {}}
    ],
    "summary": "Alice works for Acme Corp."
}"#;

/// Extraction output for "Bob works at TechCorp."
pub const BOB_TECHCORP: &str = r#"{
    "entities": [
        {"type": "Person", "properties": {"name": "Bob"}},
        {"type": "Organization", "properties": {"name": "TechCorp"}}
    ],
    "relationships": [
        {"from": "Bob", "to": "TechCorp", "type": "WORKS_FOR", "properties": {}}
    ],
    "summary": "Bob works for TechCorp."
}"#;

/// Build a pipeline over a fresh in-memory store with the given scripted
/// LLM outputs.
pub fn pipeline_with(outputs: &[&str]) -> Pipeline {
    pipeline_on(Arc::new(MemoryGraphStore::new()), "default", outputs)
}

/// Build a pipeline over a shared store under a specific scope.
pub fn pipeline_on(
    store: Arc<MemoryGraphStore>,
    scope_id: &str,
    outputs: &[&str],
) -> Pipeline {
    init_tracing();
    let mut config = Config::default();
    config.scope.id = scope_id.to_string();
    Pipeline::builder(config)
        .with_store(store)
        .with_embedding_provider(HashEmbedder::new())
        .with_llm_provider(ScriptedLlm::new(outputs))
        .build()
        .expect("pipeline construction")
}

/// Subscribe a channel to one event type on a bus.
pub fn capture(
    bus: &EventBus,
    event_type: EventType,
) -> tokio::sync::mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    bus.on(
        event_type,
        Arc::new(move |event| {
            let _ = tx.send(event);
        }),
    );
    rx
}

/// Receive the next captured event or panic after one second.
pub async fn next_event(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}
