//! Extraction and validation engine.
//!
//! Turns raw text into a candidate set of typed entities and
//! relationships via the LLM provider, then filters, deduplicates, and
//! validates the candidates against the ontology. Zero survivors is a
//! valid outcome, not an error.

mod prompt;

pub use prompt::{build_extraction_prompt, build_retry_prompt, parse_extraction};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ExtractionError, LatticeError, ProviderError, Result};
use crate::events::{Event, EventBus, EventPayload, EventType, ExtractionEventData};
use crate::graph::{Entity, Relationship};
use crate::ontology::Ontology;
use crate::provider::LlmProvider;

use prompt::{RawExtraction, EXTRACTION_SYSTEM};

/// Low temperature for deterministic structured responses.
const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// The validated output of one extraction run.
///
/// Transient: consumed by the pipeline to produce store writes, never
/// persisted directly. Relationship endpoints reference the candidate
/// entity ids in `entities`; the pipeline remaps them to stored ids.
/// `deferred` holds relationships whose endpoints were not extracted
/// alongside them; the pipeline resolves those against entities already
/// in the store.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub deferred: Vec<DeferredRelationship>,
    pub summary: String,
}

/// A relationship of a declared type whose endpoints could not be
/// resolved within the extraction itself. Endpoints are identity keys;
/// the pipeline looks them up among the stored entities of the scope
/// and drops the relationship if either is still unknown.
#[derive(Debug, Clone)]
pub struct DeferredRelationship {
    pub from_key: String,
    pub to_key: String,
    pub rel_type: String,
    pub properties: HashMap<String, serde_json::Value>,
}

/// Extracts validated graph candidates from text.
pub struct ExtractionEngine {
    llm: Arc<dyn LlmProvider>,
    events: Arc<EventBus>,
    timeout: Duration,
}

impl ExtractionEngine {
    /// Create an engine over an LLM provider.
    pub fn new(llm: Arc<dyn LlmProvider>, events: Arc<EventBus>, timeout: Duration) -> Self {
        Self {
            llm,
            events,
            timeout,
        }
    }

    /// Extract a validated entity/relationship set from `text`.
    ///
    /// Performs a single corrective retry when the model output cannot be
    /// parsed, then fails with [`ExtractionError`].
    pub async fn extract(
        &self,
        text: &str,
        ontology: &Ontology,
        scope_id: &str,
    ) -> Result<ExtractionResult> {
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyInput.into());
        }

        self.events.emit(Event::new(
            EventType::ExtractionStarted,
            scope_id,
            EventPayload::Extraction(ExtractionEventData {
                text_len: text.len(),
                ..Default::default()
            }),
        ));

        let raw = self.request_candidates(text, ontology).await?;
        let result = validate_candidates(raw, ontology, scope_id);

        self.events.emit(Event::new(
            EventType::ExtractionCompleted,
            scope_id,
            EventPayload::Extraction(ExtractionEventData {
                text_len: text.len(),
                entities: result.entities.len(),
                relationships: result.relationships.len(),
            }),
        ));

        Ok(result)
    }

    async fn request_candidates(&self, text: &str, ontology: &Ontology) -> Result<RawExtraction> {
        let prompt = build_extraction_prompt(text, ontology);
        let output = self.generate(&prompt).await?;

        match parse_extraction(&output) {
            Ok(raw) => Ok(raw),
            Err(parse_error) => {
                warn!(%parse_error, "extraction output unparsable, retrying once");
                let retry = build_retry_prompt(&prompt, &output, &parse_error);
                let output = self.generate(&retry).await?;
                parse_extraction(&output)
                    .map_err(|e| ExtractionError::Unparsable(e).into())
            }
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let call = self.llm.generate(
            prompt,
            None,
            Some(EXTRACTION_SYSTEM),
            Some(EXTRACTION_TEMPERATURE),
        );
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(LatticeError::Provider(ProviderError::EmptyResponse))) => {
                Err(ExtractionError::EmptyOutput.into())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::Timeout(self.timeout.as_millis() as u64).into()),
        }
    }
}

/// Filter, deduplicate, and semantically validate raw candidates.
fn validate_candidates(raw: RawExtraction, ontology: &Ontology, scope_id: &str) -> ExtractionResult {
    // Materialize candidates, deduplicating entities case-insensitively
    // by name and keeping the richest property set.
    let mut by_name: HashMap<String, Entity> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for candidate in raw.entities {
        let Some(name) = candidate.resolved_name() else {
            debug!(label = %candidate.label, "dropping unnamed candidate entity");
            continue;
        };
        let key = name.trim().to_lowercase();
        match by_name.get_mut(&key) {
            Some(existing) => {
                for (prop, value) in candidate.properties {
                    existing.properties.entry(prop).or_insert(value);
                }
            }
            None => {
                let mut entity = Entity::new(candidate.label, name, scope_id);
                for (prop, value) in candidate.properties {
                    entity.properties.entry(prop).or_insert(value);
                }
                order.push(key.clone());
                by_name.insert(key, entity);
            }
        }
    }

    // Semantic validation: unknown labels and missing required properties
    // reject the entity; relationships referencing it fall with it.
    let mut rejected: HashSet<String> = HashSet::new();
    order.retain(|key| {
        let entity = &by_name[key];
        match ontology.validate_entity(entity) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "rejecting candidate entity");
                by_name.remove(key);
                rejected.insert(key.clone());
                false
            }
        }
    });

    // Structural filtering and dedup of relationships. Endpoints that
    // never appeared as candidates may still name entities learned from
    // earlier texts, so those edges are deferred for the pipeline to
    // resolve against the store instead of dropped outright.
    let mut seen_edges: HashMap<(String, String, String), ()> = HashMap::new();
    let mut seen_deferred: HashSet<(String, String, String)> = HashSet::new();
    let mut relationships = Vec::new();
    let mut deferred = Vec::new();
    for candidate in raw.relationships {
        let from_key = candidate.from.trim().to_lowercase();
        let to_key = candidate.to.trim().to_lowercase();
        if from_key == to_key {
            debug!(name = %candidate.from, "dropping self-referential relationship");
            continue;
        }

        let rel_type = candidate.rel_type.trim().to_uppercase().replace(' ', "_");
        let Some(def) = ontology.relationship_type(&rel_type) else {
            debug!(%rel_type, "dropping relationship of undeclared type");
            continue;
        };

        let (from, to) = match (by_name.get(&from_key), by_name.get(&to_key)) {
            (Some(from), Some(to)) => (from, to),
            _ => {
                if rejected.contains(&from_key) || rejected.contains(&to_key) {
                    debug!(from = %candidate.from, to = %candidate.to, "dropping relationship to rejected entity");
                    continue;
                }
                if seen_deferred.insert((from_key.clone(), to_key.clone(), rel_type.clone())) {
                    debug!(from = %candidate.from, to = %candidate.to, %rel_type, "deferring relationship to store resolution");
                    deferred.push(DeferredRelationship {
                        from_key,
                        to_key,
                        rel_type,
                        properties: candidate.properties,
                    });
                }
                continue;
            }
        };
        if !def.allows(&from.label, &to.label) {
            debug!(
                %rel_type,
                from = %from.label,
                to = %to.label,
                "dropping relationship with undeclared endpoint pair"
            );
            continue;
        }

        let edge = (from.id.clone(), to.id.clone(), rel_type.clone());
        if seen_edges.insert(edge, ()).is_some() {
            continue;
        }

        let mut relationship = Relationship::new(&from.id, rel_type, &to.id, scope_id);
        relationship.properties = candidate.properties;
        relationships.push(relationship);
    }

    let entities = order.into_iter().filter_map(|key| by_name.remove(&key)).collect();
    ExtractionResult {
        entities,
        relationships,
        deferred,
        summary: raw.summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// LLM stub that replays a scripted sequence of outputs.
    struct ScriptedLlm {
        outputs: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(outputs: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(outputs.iter().rev().map(|s| s.to_string()).collect()),
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
                .pop()
                .ok_or_else(|| ProviderError::EmptyResponse.into())
        }
    }

    fn engine(llm: Arc<dyn LlmProvider>) -> ExtractionEngine {
        ExtractionEngine::new(llm, Arc::new(EventBus::new()), Duration::from_secs(5))
    }

    const VALID_OUTPUT: &str = r#"{
        "entities": [
            {"type": "Person", "properties": {"name": "Alice"}},
            {"type": "Organization", "properties": {"name": "Acme Corp"}},
            {"type": "Person", "properties": {"name": "alice", "role": "engineer"}}
        ],
        "relationships": [
            {"from": "Alice", "to": "Acme Corp", "type": "WORKS_FOR", "properties": {}},
            {"from": "Alice", "to": "Acme Corp", "type": "WORKS_FOR", "properties": {}},
            {"from": "Alice", "to": "Alice", "type": "KNOWS", "properties": {}},
            {"from": "Alice", "to": "Nowhere", "type": "KNOWS", "properties": {}},
            {"from": "Acme Corp", "to": "Alice", "type": "WORKS_FOR", "properties": {}}
        ],
        "summary": "Alice works for Acme Corp."
    }"#;

    #[tokio::test]
    async fn test_extract_filters_and_dedups() {
        let engine = engine(ScriptedLlm::new(&[VALID_OUTPUT]));
        let result = engine
            .extract("Alice works for Acme Corp.", &Ontology::default(), "s1")
            .await
            .unwrap();

        // Case-insensitive entity dedup kept the richest property set.
        assert_eq!(result.entities.len(), 2);
        let alice = result.entities.iter().find(|e| e.name() == Some("Alice")).unwrap();
        assert_eq!(alice.properties.get("role"), Some(&serde_json::json!("engineer")));

        // Duplicate edge, self-loop, and reversed endpoint pair
        // (Organization WORKS_FOR Person) all dropped.
        assert_eq!(result.relationships.len(), 1);
        assert_eq!(result.relationships[0].rel_type, "WORKS_FOR");
        assert!(result
            .relationships
            .iter()
            .all(|r| r.from_id != r.to_id));
        assert_eq!(result.summary, "Alice works for Acme Corp.");

        // The edge to an entity absent from this extraction is deferred,
        // not dropped.
        assert_eq!(result.deferred.len(), 1);
        assert_eq!(result.deferred[0].from_key, "alice");
        assert_eq!(result.deferred[0].to_key, "nowhere");
        assert_eq!(result.deferred[0].rel_type, "KNOWS");
    }

    #[tokio::test]
    async fn test_corrective_retry_recovers() {
        let engine = engine(ScriptedLlm::new(&[
            "Sorry, here are the entities I found:",
            r#"{"entities": [{"type": "Person", "properties": {"name": "Bob"}}], "relationships": [], "summary": ""}"#,
        ]));
        let result = engine
            .extract("Bob exists.", &Ontology::default(), "s1")
            .await
            .unwrap();
        assert_eq!(result.entities.len(), 1);
    }

    #[tokio::test]
    async fn test_unparsable_after_retry_fails() {
        let engine = engine(ScriptedLlm::new(&["garbage", "more garbage"]));
        let result = engine.extract("text", &Ontology::default(), "s1").await;
        assert!(matches!(
            result,
            Err(LatticeError::Extraction(ExtractionError::Unparsable(_)))
        ));
    }

    #[tokio::test]
    async fn test_zero_survivors_is_success() {
        let output = r#"{
            "entities": [{"type": "Spaceship", "properties": {"name": "Rocinante"}}],
            "relationships": [],
            "summary": "nothing usable"
        }"#;
        let engine = engine(ScriptedLlm::new(&[output]));
        let result = engine.extract("text", &Ontology::default(), "s1").await.unwrap();
        assert!(result.entities.is_empty());
        assert!(result.relationships.is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_property_rejects_entity_and_edges() {
        let ontology = Ontology::default().with_entity_type(
            crate::ontology::EntityTypeDef::new("Person").with_required(["name", "email"]),
        );
        let output = r#"{
            "entities": [
                {"type": "Person", "properties": {"name": "Alice"}},
                {"type": "Organization", "properties": {"name": "Acme"}}
            ],
            "relationships": [
                {"from": "Alice", "to": "Acme", "type": "WORKS_FOR", "properties": {}}
            ],
            "summary": ""
        }"#;
        let engine = engine(ScriptedLlm::new(&[output]));
        let result = engine.extract("text", &ontology, "s1").await.unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].label, "Organization");
        // The edge fell with the rejected entity instead of being
        // deferred to store resolution.
        assert!(result.relationships.is_empty());
        assert!(result.deferred.is_empty());
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let engine = engine(ScriptedLlm::new(&[VALID_OUTPUT]));
        assert!(engine.extract("  ", &Ontology::default(), "s1").await.is_err());
    }
}
