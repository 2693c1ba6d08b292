//! Lattice: Knowledge Graph Extraction and Semantic Retrieval
//!
//! A pipeline that turns unstructured text into a typed, scoped knowledge
//! graph via LLM extraction, embeds entities for similarity search, and
//! answers questions grounded in bounded subgraphs of that graph.

pub mod config;
pub mod error;
pub mod events;
pub mod extraction;
pub mod graph;
pub mod indexing;
pub mod ontology;
pub mod pipeline;
pub mod provider;
pub mod retrieval;
pub mod store;

pub use config::{
    Config, EmbeddingProviderConfig, LlmProviderConfig, PipelineConfig, ProviderKind,
    RetrievalConfig, ScopeConfig, StoreConfig, StoreKind,
};
pub use error::{
    ExtractionError, LatticeError, ProviderError, Result, SchemaError, ValidationError,
};
pub use events::{
    BatchEventData, Event, EventBus, EventHandler, EventPayload, EventType, ExtractionEventData,
    HandlerId, LearnEventData, QueryEventData,
};
pub use extraction::{DeferredRelationship, ExtractionEngine, ExtractionResult};
pub use graph::{
    content_hash, Document, Entity, GraphStats, Relationship, Scope, Subgraph,
    INTERNAL_PROPERTIES,
};
pub use indexing::{cosine_similarity, entity_embedding_text, EmbeddingManager};
pub use ontology::{EntityTypeDef, Ontology, RelationshipTypeDef};
pub use pipeline::{
    Answer, AskOptions, BatchError, BatchSummary, LearnOptions, LearnResult, LearnStage, Pipeline,
    PipelineBuilder,
};
pub use provider::{
    create_embedding_provider, create_llm_provider, EmbeddingProvider, LlmProvider,
    OpenAiEmbeddingProvider, OpenAiLlmProvider,
};
pub use retrieval::{format_subgraph, RetrievalEngine, RetrievalFilter};
pub use store::{create_store, EntityFilter, GraphStore, MemoryGraphStore, Upserted};
