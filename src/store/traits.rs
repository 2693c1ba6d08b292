//! Graph store trait definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::graph::{Document, Entity, GraphStats, Relationship};

/// Result of an upsert: the stored value and whether it was newly created
/// (as opposed to merged into an existing node/edge).
#[derive(Debug, Clone)]
pub struct Upserted<T> {
    pub value: T,
    pub created: bool,
}

/// Filters applied to entity listings and vector search.
///
/// Filtering happens before ranking/limiting, so results are never
/// displaced by out-of-scope or out-of-time matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityFilter {
    /// Restrict to one type label.
    pub label: Option<String>,
    /// Only entities carrying an embedding vector.
    pub require_embedding: bool,
    /// Only entities valid at this instant.
    pub valid_at: Option<DateTime<Utc>>,
    /// Only entities derived from a document with this context tag.
    pub context_tag: Option<String>,
}

impl EntityFilter {
    /// Filter to entities usable for vector search.
    pub fn embedded() -> Self {
        Self {
            require_embedding: true,
            ..Default::default()
        }
    }

    /// Restrict to entities valid at an instant.
    pub fn with_valid_at(mut self, valid_at: DateTime<Utc>) -> Self {
        self.valid_at = Some(valid_at);
        self
    }

    /// Restrict to entities from documents tagged with a named context.
    pub fn with_context_tag(mut self, tag: impl Into<String>) -> Self {
        self.context_tag = Some(tag.into());
        self
    }
}

/// Trait for graph storage backends.
///
/// Every operation is scoped: implementations must never return or mutate
/// data outside the given scope id. Implementations manage their own
/// connection/session pooling; each call is a self-contained session so
/// callers can interleave slow provider calls without starving the pool.
#[async_trait]
pub trait GraphStore: Send + Sync {
    // ========================================================================
    // Entity Operations
    // ========================================================================

    /// Insert a new entity as-is.
    async fn create_entity(&self, entity: Entity) -> Result<Entity>;

    /// Get an entity by ID within a scope.
    async fn get_entity(&self, id: &str, scope_id: &str) -> Result<Option<Entity>>;

    /// Find an entity by its case-insensitive identity key within a scope.
    async fn find_entity_by_key(
        &self,
        scope_id: &str,
        identity_key: &str,
    ) -> Result<Option<Entity>>;

    /// Insert or merge by identity key: re-asserting the same named entity
    /// within a scope merges properties instead of duplicating the node.
    async fn upsert_entity(&self, entity: Entity) -> Result<Upserted<Entity>>;

    /// Merge the given properties into an existing entity.
    async fn update_entity(
        &self,
        id: &str,
        scope_id: &str,
        properties: HashMap<String, serde_json::Value>,
    ) -> Result<Entity>;

    /// Delete an entity and all relationships involving it.
    async fn delete_entity(&self, id: &str, scope_id: &str) -> Result<bool>;

    /// List entities in a scope matching a filter.
    async fn list_entities(&self, scope_id: &str, filter: &EntityFilter) -> Result<Vec<Entity>>;

    // ========================================================================
    // Relationship Operations
    // ========================================================================

    /// Insert or merge by `(from, to, type, scope)`: re-asserting the same
    /// fact is idempotent.
    async fn upsert_relationship(
        &self,
        relationship: Relationship,
    ) -> Result<Upserted<Relationship>>;

    /// Get a relationship by ID within a scope.
    async fn get_relationship(&self, id: &str, scope_id: &str) -> Result<Option<Relationship>>;

    /// Delete a relationship by ID.
    async fn delete_relationship(&self, id: &str, scope_id: &str) -> Result<bool>;

    /// All relationships touching an entity (either direction).
    async fn relationships_involving(
        &self,
        entity_id: &str,
        scope_id: &str,
    ) -> Result<Vec<Relationship>>;

    /// List all relationships in a scope.
    async fn list_relationships(&self, scope_id: &str) -> Result<Vec<Relationship>>;

    // ========================================================================
    // Document Operations
    // ========================================================================

    /// Insert or resolve by content hash: identical text within a scope
    /// resolves to the existing document node.
    async fn upsert_document(&self, document: Document) -> Result<Upserted<Document>>;

    /// Find a document by its content hash within a scope.
    async fn get_document_by_hash(
        &self,
        scope_id: &str,
        content_hash: &str,
    ) -> Result<Option<Document>>;

    /// Record that a document contributed the given entities.
    async fn link_document_entities(
        &self,
        document_id: &str,
        scope_id: &str,
        entity_ids: &[String],
    ) -> Result<()>;

    // ========================================================================
    // Vector Search
    // ========================================================================

    /// Idempotently create a similarity index over entity embeddings with
    /// the given dimensionality. A mismatch with an existing index is a
    /// fatal configuration error.
    async fn ensure_vector_index(&self, dimensions: usize) -> Result<()>;

    /// Whether a usable vector index exists.
    async fn vector_index_ready(&self) -> bool;

    /// Nearest-neighbor search over in-scope entity embeddings. Filters
    /// are applied before ranking. Fails with a search-unavailable error
    /// when no index exists, so callers can fall back to a linear scan.
    async fn find_by_vector(
        &self,
        vector: &[f32],
        scope_id: &str,
        top_k: usize,
        filter: &EntityFilter,
    ) -> Result<Vec<(Entity, f32)>>;

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Counts of stored objects within a scope.
    async fn stats(&self, scope_id: &str) -> Result<GraphStats>;
}
