//! In-memory graph store.
//!
//! Reference implementation of [`GraphStore`]: HashMaps behind a single
//! RwLock, with secondary indexes for identity keys, edge keys, and
//! content hashes. The vector "index" is a dimensionality-checked scan
//! over stored embeddings; it exists so the index path and the caller's
//! brute-force fallback can be exercised independently.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ProviderError, Result, SchemaError, ValidationError};
use crate::graph::{Document, Entity, GraphStats, Relationship};
use crate::indexing::cosine_similarity;

use super::{EntityFilter, GraphStore, Upserted};

#[derive(Debug, Default)]
struct GraphData {
    /// Entities indexed by ID.
    entities: HashMap<String, Entity>,
    /// Index: (scope_id, identity key) -> entity ID.
    entity_by_key: HashMap<(String, String), String>,
    /// Relationships indexed by ID.
    relationships: HashMap<String, Relationship>,
    /// Index: (from, to, type, scope) -> relationship ID.
    rel_by_edge: HashMap<(String, String, String, String), String>,
    /// Index: entity ID -> relationship IDs touching it.
    rels_by_entity: HashMap<String, Vec<String>>,
    /// Documents indexed by ID.
    documents: HashMap<String, Document>,
    /// Index: (scope_id, content hash) -> document ID.
    doc_by_hash: HashMap<(String, String), String>,
    /// Dimensionality of the similarity index, once created.
    index_dimensions: Option<usize>,
}

impl GraphData {
    fn index_relationship(&mut self, rel: &Relationship) {
        self.rel_by_edge.insert(rel.edge_key(), rel.id.clone());
        self.rels_by_entity
            .entry(rel.from_id.clone())
            .or_default()
            .push(rel.id.clone());
        self.rels_by_entity
            .entry(rel.to_id.clone())
            .or_default()
            .push(rel.id.clone());
    }

    fn unindex_relationship(&mut self, rel: &Relationship) {
        self.rel_by_edge.remove(&rel.edge_key());
        if let Some(ids) = self.rels_by_entity.get_mut(&rel.from_id) {
            ids.retain(|id| id != &rel.id);
        }
        if let Some(ids) = self.rels_by_entity.get_mut(&rel.to_id) {
            ids.retain(|id| id != &rel.id);
        }
    }

    /// IDs of entities contributed by documents carrying a context tag.
    fn entities_with_context_tag(&self, scope_id: &str, tag: &str) -> HashSet<String> {
        let mut ids = HashSet::new();
        for doc in self.documents.values() {
            if doc.scope_id == scope_id && doc.context_tag.as_deref() == Some(tag) {
                ids.extend(doc.entity_ids.iter().cloned());
            }
        }
        ids
    }

    fn matches_filter(
        &self,
        entity: &Entity,
        scope_id: &str,
        filter: &EntityFilter,
        tagged: Option<&HashSet<String>>,
    ) -> bool {
        if entity.scope_id != scope_id {
            return false;
        }
        if let Some(label) = &filter.label {
            if &entity.label != label {
                return false;
            }
        }
        if filter.require_embedding && entity.embedding.is_none() {
            return false;
        }
        if let Some(instant) = filter.valid_at {
            if !entity.valid_at(instant) {
                return false;
            }
        }
        if let Some(tagged) = tagged {
            if !tagged.contains(&entity.id) {
                return false;
            }
        }
        true
    }
}

/// In-memory [`GraphStore`] implementation.
pub struct MemoryGraphStore {
    data: RwLock<GraphData>,
}

impl MemoryGraphStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(GraphData::default()),
        }
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn create_entity(&self, entity: Entity) -> Result<Entity> {
        let mut data = self.data.write().await;
        if let Some(key) = entity.identity_key() {
            data.entity_by_key
                .insert((entity.scope_id.clone(), key), entity.id.clone());
        }
        data.entities.insert(entity.id.clone(), entity.clone());
        Ok(entity)
    }

    async fn get_entity(&self, id: &str, scope_id: &str) -> Result<Option<Entity>> {
        let data = self.data.read().await;
        Ok(data
            .entities
            .get(id)
            .filter(|e| e.scope_id == scope_id)
            .cloned())
    }

    async fn find_entity_by_key(
        &self,
        scope_id: &str,
        identity_key: &str,
    ) -> Result<Option<Entity>> {
        let data = self.data.read().await;
        let id = data
            .entity_by_key
            .get(&(scope_id.to_string(), identity_key.to_lowercase()));
        Ok(id.and_then(|id| data.entities.get(id)).cloned())
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<Upserted<Entity>> {
        let mut data = self.data.write().await;
        if let Some(key) = entity.identity_key() {
            let index_key = (entity.scope_id.clone(), key);
            if let Some(existing_id) = data.entity_by_key.get(&index_key).cloned() {
                if let Some(existing) = data.entities.get_mut(&existing_id) {
                    existing.merge_from(&entity);
                    return Ok(Upserted {
                        value: existing.clone(),
                        created: false,
                    });
                }
            }
            data.entity_by_key.insert(index_key, entity.id.clone());
        }
        data.entities.insert(entity.id.clone(), entity.clone());
        Ok(Upserted {
            value: entity,
            created: true,
        })
    }

    async fn update_entity(
        &self,
        id: &str,
        scope_id: &str,
        properties: HashMap<String, serde_json::Value>,
    ) -> Result<Entity> {
        let mut data = self.data.write().await;
        let entity = data
            .entities
            .get_mut(id)
            .filter(|e| e.scope_id == scope_id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        entity.properties.extend(properties);
        entity.updated_at = Utc::now();
        Ok(entity.clone())
    }

    async fn delete_entity(&self, id: &str, scope_id: &str) -> Result<bool> {
        let mut data = self.data.write().await;
        let Some(entity) = data
            .entities
            .get(id)
            .filter(|e| e.scope_id == scope_id)
            .cloned()
        else {
            return Ok(false);
        };

        if let Some(key) = entity.identity_key() {
            data.entity_by_key.remove(&(entity.scope_id.clone(), key));
        }
        // Drop relationships touching the deleted entity.
        let rel_ids = data.rels_by_entity.remove(id).unwrap_or_default();
        for rel_id in rel_ids {
            if let Some(rel) = data.relationships.remove(&rel_id) {
                data.unindex_relationship(&rel);
            }
        }
        data.entities.remove(id);
        debug!(entity_id = id, scope = scope_id, "entity deleted");
        Ok(true)
    }

    async fn list_entities(&self, scope_id: &str, filter: &EntityFilter) -> Result<Vec<Entity>> {
        let data = self.data.read().await;
        let tagged = filter
            .context_tag
            .as_deref()
            .map(|tag| data.entities_with_context_tag(scope_id, tag));
        let mut entities: Vec<Entity> = data
            .entities
            .values()
            .filter(|e| data.matches_filter(e, scope_id, filter, tagged.as_ref()))
            .cloned()
            .collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entities)
    }

    async fn upsert_relationship(
        &self,
        relationship: Relationship,
    ) -> Result<Upserted<Relationship>> {
        if relationship.from_id == relationship.to_id {
            return Err(SchemaError::SelfLoop(relationship.from_id).into());
        }
        let mut data = self.data.write().await;
        if let Some(existing_id) = data.rel_by_edge.get(&relationship.edge_key()).cloned() {
            if let Some(existing) = data.relationships.get_mut(&existing_id) {
                for (key, value) in &relationship.properties {
                    existing
                        .properties
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
                return Ok(Upserted {
                    value: existing.clone(),
                    created: false,
                });
            }
        }
        data.index_relationship(&relationship);
        data.relationships
            .insert(relationship.id.clone(), relationship.clone());
        Ok(Upserted {
            value: relationship,
            created: true,
        })
    }

    async fn get_relationship(&self, id: &str, scope_id: &str) -> Result<Option<Relationship>> {
        let data = self.data.read().await;
        Ok(data
            .relationships
            .get(id)
            .filter(|r| r.scope_id == scope_id)
            .cloned())
    }

    async fn delete_relationship(&self, id: &str, scope_id: &str) -> Result<bool> {
        let mut data = self.data.write().await;
        let Some(rel) = data
            .relationships
            .get(id)
            .filter(|r| r.scope_id == scope_id)
            .cloned()
        else {
            return Ok(false);
        };
        data.unindex_relationship(&rel);
        data.relationships.remove(id);
        Ok(true)
    }

    async fn relationships_involving(
        &self,
        entity_id: &str,
        scope_id: &str,
    ) -> Result<Vec<Relationship>> {
        let data = self.data.read().await;
        let mut rels: Vec<Relationship> = data
            .rels_by_entity
            .get(entity_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| data.relationships.get(id))
                    .filter(|r| r.scope_id == scope_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rels.sort_by(|a, b| a.id.cmp(&b.id));
        rels.dedup_by(|a, b| a.id == b.id);
        Ok(rels)
    }

    async fn list_relationships(&self, scope_id: &str) -> Result<Vec<Relationship>> {
        let data = self.data.read().await;
        let mut rels: Vec<Relationship> = data
            .relationships
            .values()
            .filter(|r| r.scope_id == scope_id)
            .cloned()
            .collect();
        rels.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rels)
    }

    async fn upsert_document(&self, document: Document) -> Result<Upserted<Document>> {
        let mut data = self.data.write().await;
        let hash_key = (document.scope_id.clone(), document.content_hash.clone());
        if let Some(existing_id) = data.doc_by_hash.get(&hash_key).cloned() {
            if let Some(existing) = data.documents.get(&existing_id) {
                return Ok(Upserted {
                    value: existing.clone(),
                    created: false,
                });
            }
        }
        data.doc_by_hash.insert(hash_key, document.id.clone());
        data.documents
            .insert(document.id.clone(), document.clone());
        Ok(Upserted {
            value: document,
            created: true,
        })
    }

    async fn get_document_by_hash(
        &self,
        scope_id: &str,
        content_hash: &str,
    ) -> Result<Option<Document>> {
        let data = self.data.read().await;
        let id = data
            .doc_by_hash
            .get(&(scope_id.to_string(), content_hash.to_string()));
        Ok(id.and_then(|id| data.documents.get(id)).cloned())
    }

    async fn link_document_entities(
        &self,
        document_id: &str,
        scope_id: &str,
        entity_ids: &[String],
    ) -> Result<()> {
        let mut data = self.data.write().await;
        let doc = data
            .documents
            .get_mut(document_id)
            .filter(|d| d.scope_id == scope_id)
            .ok_or_else(|| ProviderError::NotFound(document_id.to_string()))?;
        for entity_id in entity_ids {
            if !doc.entity_ids.contains(entity_id) {
                doc.entity_ids.push(entity_id.clone());
            }
        }
        // Mirror the link on the entity side.
        let doc_id = doc.id.clone();
        for entity_id in entity_ids {
            if let Some(entity) = data.entities.get_mut(entity_id) {
                if !entity.source_ids.contains(&doc_id) {
                    entity.source_ids.push(doc_id.clone());
                }
            }
        }
        Ok(())
    }

    async fn ensure_vector_index(&self, dimensions: usize) -> Result<()> {
        if dimensions == 0 {
            return Err(ValidationError::NonPositiveDimensions(dimensions).into());
        }
        let mut data = self.data.write().await;
        match data.index_dimensions {
            Some(existing) if existing != dimensions => {
                Err(ValidationError::DimensionMismatch {
                    index: existing,
                    provider: dimensions,
                }
                .into())
            }
            Some(_) => Ok(()),
            None => {
                debug!(dimensions, "creating vector index");
                data.index_dimensions = Some(dimensions);
                Ok(())
            }
        }
    }

    async fn vector_index_ready(&self) -> bool {
        self.data.read().await.index_dimensions.is_some()
    }

    async fn find_by_vector(
        &self,
        vector: &[f32],
        scope_id: &str,
        top_k: usize,
        filter: &EntityFilter,
    ) -> Result<Vec<(Entity, f32)>> {
        let data = self.data.read().await;
        let Some(dimensions) = data.index_dimensions else {
            return Err(
                ProviderError::SearchUnavailable("no vector index".to_string()).into(),
            );
        };
        if vector.len() != dimensions {
            return Err(ProviderError::Index(format!(
                "query vector has {} dimensions, index has {dimensions}",
                vector.len()
            ))
            .into());
        }

        let tagged = filter
            .context_tag
            .as_deref()
            .map(|tag| data.entities_with_context_tag(scope_id, tag));
        let mut scored: Vec<(Entity, f32)> = data
            .entities
            .values()
            .filter(|e| e.embedding.is_some())
            .filter(|e| data.matches_filter(e, scope_id, filter, tagged.as_ref()))
            .map(|e| {
                let score = cosine_similarity(vector, e.embedding.as_deref().unwrap_or(&[]));
                (e.clone(), score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn stats(&self, scope_id: &str) -> Result<GraphStats> {
        let data = self.data.read().await;
        Ok(GraphStats {
            entity_count: data
                .entities
                .values()
                .filter(|e| e.scope_id == scope_id)
                .count(),
            relationship_count: data
                .relationships
                .values()
                .filter(|r| r.scope_id == scope_id)
                .count(),
            document_count: data
                .documents
                .values()
                .filter(|d| d.scope_id == scope_id)
                .count(),
        })
    }
}
