//! Pipeline orchestrator: `learn`, `learn_batch`, and `ask`.
//!
//! Sequences extraction, embedding, store writes, and retrieval under one
//! scope, emits lifecycle and mutation events, and enforces provider
//! timeouts. A learn call moves through
//! `Started → Extracting → Validating → Embedding → Writing → Completed`
//! and transitions straight to `Failed` on any stage error; the only
//! retry anywhere is extraction's single corrective re-parse.

mod batch;

pub use batch::{BatchError, BatchSummary};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{ProviderError, Result};
use crate::events::{
    Event, EventBus, EventPayload, EventType, LearnEventData, QueryEventData,
};
use crate::extraction::ExtractionEngine;
use crate::graph::{Document, Entity, GraphStats, Relationship, Scope, Subgraph};
use crate::indexing::{entity_embedding_text, EmbeddingManager};
use crate::ontology::Ontology;
use crate::provider::{
    create_embedding_provider, create_llm_provider, EmbeddingProvider, LlmProvider,
};
use crate::retrieval::{format_subgraph, RetrievalEngine, RetrievalFilter};
use crate::store::{create_store, GraphStore};

/// System message used when answering questions.
const ANSWER_SYSTEM: &str = "You answer questions using ONLY the knowledge graph \
context provided. If the context does not contain the answer, say you do not know. \
Be concise and name the entities you relied on.";

/// Stages of a single learn call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnStage {
    Started,
    Extracting,
    Validating,
    Embedding,
    Writing,
    Completed,
    Failed,
}

/// Options for a learn call.
#[derive(Debug, Clone, Default)]
pub struct LearnOptions {
    /// Named-context tag recorded on the source document.
    pub context_tag: Option<String>,
    /// Temporal validity bounds applied to written entities and edges.
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

/// Options for an ask call. Unset fields fall back to the retrieval
/// defaults in [`Config`].
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub top_k: Option<usize>,
    pub hop_limit: Option<usize>,
    pub max_nodes: Option<usize>,
    pub min_similarity: Option<f32>,
    /// Point-in-time filter for temporally bounded graph data.
    pub valid_at: Option<DateTime<Utc>>,
    /// Restrict grounding to documents with this context tag.
    pub context_tag: Option<String>,
    /// Sampling temperature for answer generation.
    pub temperature: Option<f32>,
}

/// Result of one learn call: what was actually written.
#[derive(Debug, Clone)]
pub struct LearnResult {
    pub document_id: String,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub summary: String,
    /// Nodes newly created (as opposed to merged into existing ones).
    pub entities_created: usize,
    /// Edges newly created.
    pub relationships_created: usize,
}

/// Result of an ask call: the answer plus the subgraph it was grounded
/// in, so callers can audit groundedness.
#[derive(Debug, Clone)]
pub struct Answer {
    pub answer: String,
    pub context: String,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

/// Builder wiring providers and the store into a [`Pipeline`].
pub struct PipelineBuilder {
    config: Config,
    store: Option<Arc<dyn GraphStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    llm: Option<Arc<dyn LlmProvider>>,
    ontology: Option<Ontology>,
}

impl PipelineBuilder {
    /// Start a builder from configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            embedder: None,
            llm: None,
            ontology: None,
        }
    }

    /// Use a custom graph store.
    pub fn with_store(mut self, store: Arc<dyn GraphStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a custom embedding provider.
    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(provider);
        self
    }

    /// Use a custom LLM provider.
    pub fn with_llm_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(provider);
        self
    }

    /// Use a custom ontology instead of the configured one.
    pub fn with_ontology(mut self, ontology: Ontology) -> Self {
        self.ontology = Some(ontology);
        self
    }

    /// Validate configuration and construct the pipeline.
    ///
    /// Provider selection happens here, once; a misconfigured provider
    /// fails fast rather than on first use. Must be called within a
    /// tokio runtime (the event bus spawns its delivery worker).
    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;
        let ontology = match self.ontology {
            Some(ontology) => ontology,
            None => self.config.ontology()?,
        };
        let store = match self.store {
            Some(store) => store,
            None => create_store(&self.config.store)?,
        };
        let embedder = match self.embedder {
            Some(embedder) => embedder,
            None => create_embedding_provider(&self.config.embedding)?,
        };
        let llm = match self.llm {
            Some(llm) => llm,
            None => create_llm_provider(&self.config.llm)?,
        };

        let timeout = Duration::from_secs(self.config.pipeline.provider_timeout_secs);
        let events = Arc::new(EventBus::new());
        let scope = Scope::new(
            self.config.scope.id.clone(),
            self.config.scope.scope_type.clone(),
            self.config.scope.name.clone(),
        );

        Ok(Pipeline {
            extraction: ExtractionEngine::new(Arc::clone(&llm), Arc::clone(&events), timeout),
            embedding: EmbeddingManager::new(embedder, timeout),
            retrieval: RetrievalEngine::new(Arc::clone(&store)),
            store,
            llm,
            events,
            ontology,
            scope,
            config: self.config,
            timeout,
        })
    }
}

/// The knowledge pipeline: learn text into the graph, ask questions
/// grounded in it.
pub struct Pipeline {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn GraphStore>,
    llm: Arc<dyn LlmProvider>,
    pub(crate) events: Arc<EventBus>,
    extraction: ExtractionEngine,
    embedding: EmbeddingManager,
    retrieval: RetrievalEngine,
    ontology: Ontology,
    scope: Scope,
    timeout: Duration,
}

impl Pipeline {
    /// Construct a pipeline from configuration with default providers.
    pub fn new(config: Config) -> Result<Self> {
        PipelineBuilder::new(config).build()
    }

    /// Start a builder for custom wiring.
    pub fn builder(config: Config) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// The event bus observers subscribe to.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// The scope every operation runs under.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Counts of stored graph objects in this scope.
    pub async fn stats(&self) -> Result<GraphStats> {
        self.store.stats(&self.scope.id).await
    }

    // ========================================================================
    // Learn
    // ========================================================================

    /// Extract a knowledge graph from `text` and persist it.
    ///
    /// Emits `learn.started`, mutation events for what was actually
    /// written, and exactly one of `learn.completed` / `learn.failed`.
    pub async fn learn(&self, text: &str, options: &LearnOptions) -> Result<LearnResult> {
        self.events.emit(Event::new(
            EventType::LearnStarted,
            &self.scope.id,
            EventPayload::Learn(LearnEventData {
                text_len: text.len(),
                ..Default::default()
            }),
        ));

        match self.learn_inner(text, options).await {
            Ok(result) => {
                self.events.emit(Event::new(
                    EventType::LearnCompleted,
                    &self.scope.id,
                    EventPayload::Learn(LearnEventData {
                        text_len: text.len(),
                        entities_written: result.entities.len(),
                        relationships_written: result.relationships.len(),
                        error: None,
                    }),
                ));
                Ok(result)
            }
            Err(e) => {
                self.events.emit(Event::new(
                    EventType::LearnFailed,
                    &self.scope.id,
                    EventPayload::Learn(LearnEventData {
                        text_len: text.len(),
                        error: Some(e.to_string()),
                        ..Default::default()
                    }),
                ));
                Err(e)
            }
        }
    }

    async fn learn_inner(&self, text: &str, options: &LearnOptions) -> Result<LearnResult> {
        debug!(stage = ?LearnStage::Extracting, "learn");
        let extracted = self
            .extraction
            .extract(text, &self.ontology, &self.scope.id)
            .await?;
        debug!(
            stage = ?LearnStage::Validating,
            entities = extracted.entities.len(),
            relationships = extracted.relationships.len(),
            "extraction validated"
        );

        debug!(stage = ?LearnStage::Embedding, "learn");
        self.embedding.ensure_index(self.store.as_ref()).await?;
        let vectors = if extracted.entities.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<String> = extracted
                .entities
                .iter()
                .map(entity_embedding_text)
                .collect();
            self.embedding.embed_batch(&texts).await?
        };

        debug!(stage = ?LearnStage::Writing, "learn");
        let mut document = Document::new(text, &self.scope.id);
        if let Some(tag) = &options.context_tag {
            document = document.with_context_tag(tag.clone());
        }
        let doc = self.store.upsert_document(document).await?;
        if doc.created {
            self.events.emit(Event::new(
                EventType::DocumentCreated,
                &self.scope.id,
                EventPayload::Document(doc.value.clone()),
            ));
        }

        // Upsert entities, remembering candidate id -> stored id so
        // relationship endpoints can be remapped after merges.
        let mut id_map: HashMap<String, String> = HashMap::new();
        let mut stored_entities = Vec::new();
        let mut entities_created = 0;
        for (entity, vector) in extracted.entities.into_iter().zip(vectors) {
            let candidate_id = entity.id.clone();
            let entity = entity
                .with_embedding(vector)
                .with_validity(options.valid_from, options.valid_to);
            let upserted = self.store.upsert_entity(entity).await?;
            id_map.insert(candidate_id, upserted.value.id.clone());
            let event_type = if upserted.created {
                entities_created += 1;
                EventType::EntityCreated
            } else {
                EventType::EntityUpdated
            };
            self.events.emit(Event::new(
                event_type,
                &self.scope.id,
                EventPayload::Entity(upserted.value.clone()),
            ));
            stored_entities.push(upserted.value);
        }

        let entity_ids: Vec<String> = stored_entities.iter().map(|e| e.id.clone()).collect();
        if !entity_ids.is_empty() {
            self.store
                .link_document_entities(&doc.value.id, &self.scope.id, &entity_ids)
                .await?;
        }

        let mut stored_relationships = Vec::new();
        let mut relationships_created = 0;
        for mut rel in extracted.relationships {
            let (Some(from), Some(to)) = (id_map.get(&rel.from_id), id_map.get(&rel.to_id))
            else {
                continue;
            };
            rel.from_id = from.clone();
            rel.to_id = to.clone();
            if rel.from_id == rel.to_id {
                // Distinct candidates can merge into one stored node.
                continue;
            }
            let rel = rel.with_validity(options.valid_from, options.valid_to);
            let upserted = self.store.upsert_relationship(rel).await?;
            let event_type = if upserted.created {
                relationships_created += 1;
                EventType::RelationshipCreated
            } else {
                EventType::RelationshipUpdated
            };
            self.events.emit(Event::new(
                event_type,
                &self.scope.id,
                EventPayload::Relationship(upserted.value.clone()),
            ));
            stored_relationships.push(upserted.value);
        }

        // Deferred edges name entities absent from this extraction. The
        // entities of this learn are in the store by now, so a single
        // identity-key lookup covers both them and earlier learns.
        for deferred in extracted.deferred {
            let from = self
                .store
                .find_entity_by_key(&self.scope.id, &deferred.from_key)
                .await?;
            let to = self
                .store
                .find_entity_by_key(&self.scope.id, &deferred.to_key)
                .await?;
            let (Some(from), Some(to)) = (from, to) else {
                debug!(
                    from = %deferred.from_key,
                    to = %deferred.to_key,
                    "dropping deferred relationship with unknown endpoint"
                );
                continue;
            };
            if from.id == to.id {
                continue;
            }
            let Some(def) = self.ontology.relationship_type(&deferred.rel_type) else {
                continue;
            };
            if !def.allows(&from.label, &to.label) {
                debug!(
                    rel_type = %deferred.rel_type,
                    from = %from.label,
                    to = %to.label,
                    "dropping deferred relationship with undeclared endpoint pair"
                );
                continue;
            }

            let mut rel = Relationship::new(&from.id, deferred.rel_type, &to.id, &self.scope.id);
            rel.properties = deferred.properties;
            let rel = rel.with_validity(options.valid_from, options.valid_to);
            let upserted = self.store.upsert_relationship(rel).await?;
            let event_type = if upserted.created {
                relationships_created += 1;
                EventType::RelationshipCreated
            } else {
                EventType::RelationshipUpdated
            };
            self.events.emit(Event::new(
                event_type,
                &self.scope.id,
                EventPayload::Relationship(upserted.value.clone()),
            ));
            stored_relationships.push(upserted.value);
        }

        info!(
            document = %doc.value.id,
            entities = stored_entities.len(),
            relationships = stored_relationships.len(),
            "learned text"
        );
        Ok(LearnResult {
            document_id: doc.value.id,
            entities: stored_entities,
            relationships: stored_relationships,
            summary: extracted.summary,
            entities_created,
            relationships_created,
        })
    }

    // ========================================================================
    // Ask
    // ========================================================================

    /// Answer a natural-language question grounded in the graph.
    pub async fn ask(&self, query: &str, options: &AskOptions) -> Result<Answer> {
        if query.trim().is_empty() {
            return Err(ProviderError::EmptyInput.into());
        }
        self.events.emit(Event::new(
            EventType::QueryStarted,
            &self.scope.id,
            EventPayload::Query(QueryEventData {
                query: query.to_string(),
                ..Default::default()
            }),
        ));

        let retrieval_cfg = &self.config.retrieval;
        let filter = RetrievalFilter {
            valid_at: options.valid_at,
            context_tag: options.context_tag.clone(),
        };

        let query_vector = self.embedding.embed_text(query).await?;
        let seeds = self
            .retrieval
            .find_seeds(
                &query_vector,
                &self.scope.id,
                options.top_k.unwrap_or(retrieval_cfg.top_k),
                &filter,
                options.min_similarity.unwrap_or(retrieval_cfg.min_similarity),
            )
            .await?;

        let seed_entities: Vec<Entity> = seeds.into_iter().map(|(e, _)| e).collect();
        let subgraph = self
            .retrieval
            .expand(
                &seed_entities,
                &self.scope.id,
                options.hop_limit.unwrap_or(retrieval_cfg.hop_limit),
                options.max_nodes.unwrap_or(retrieval_cfg.max_nodes),
                &filter,
            )
            .await?;

        let context = format_subgraph(&subgraph, retrieval_cfg.context_char_budget);
        let grounding = if context.is_empty() {
            "(no relevant knowledge found)"
        } else {
            context.as_str()
        };

        let answer = self
            .generate_answer(query, grounding, options.temperature)
            .await?;

        self.events.emit(Event::new(
            EventType::QueryCompleted,
            &self.scope.id,
            EventPayload::Query(QueryEventData {
                query: query.to_string(),
                seeds: seed_entities.len(),
                context_entities: subgraph.entities.len(),
            }),
        ));

        let Subgraph {
            entities,
            relationships,
        } = subgraph;
        Ok(Answer {
            answer,
            context,
            entities,
            relationships,
        })
    }

    async fn generate_answer(
        &self,
        query: &str,
        context: &str,
        temperature: Option<f32>,
    ) -> Result<String> {
        let call = self
            .llm
            .generate(query, Some(context), Some(ANSWER_SYSTEM), temperature);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.timeout.as_millis() as u64).into()),
        }
    }

    // ========================================================================
    // Explicit Mutations
    // ========================================================================

    /// Merge properties into an entity, emitting `entity.updated`.
    pub async fn update_entity(
        &self,
        id: &str,
        properties: HashMap<String, serde_json::Value>,
    ) -> Result<Entity> {
        let entity = self
            .store
            .update_entity(id, &self.scope.id, properties)
            .await?;
        self.events.emit(Event::new(
            EventType::EntityUpdated,
            &self.scope.id,
            EventPayload::Entity(entity.clone()),
        ));
        Ok(entity)
    }

    /// Delete an entity (and its relationships), emitting `entity.deleted`.
    pub async fn delete_entity(&self, id: &str) -> Result<bool> {
        let Some(entity) = self.store.get_entity(id, &self.scope.id).await? else {
            return Ok(false);
        };
        let deleted = self.store.delete_entity(id, &self.scope.id).await?;
        if deleted {
            self.events.emit(Event::new(
                EventType::EntityDeleted,
                &self.scope.id,
                EventPayload::Entity(entity),
            ));
        }
        Ok(deleted)
    }

    /// Delete a relationship, emitting `relationship.deleted`.
    pub async fn delete_relationship(&self, id: &str) -> Result<bool> {
        let Some(rel) = self.store.get_relationship(id, &self.scope.id).await? else {
            return Ok(false);
        };
        let deleted = self.store.delete_relationship(id, &self.scope.id).await?;
        if deleted {
            self.events.emit(Event::new(
                EventType::RelationshipDeleted,
                &self.scope.id,
                EventPayload::Relationship(rel),
            ));
        }
        Ok(deleted)
    }
}
