//! Core types of the knowledge graph.
//!
//! Entities, relationships, documents, and scopes. Entities and
//! relationships are what extraction produces and retrieval traverses;
//! documents link graph nodes back to the text they were derived from;
//! scopes are the tenant-isolation boundary for everything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Property names that never participate in embedding text or formatting.
pub const INTERNAL_PROPERTIES: &[&str] = &[
    "id",
    "embedding",
    "scope_id",
    "created_at",
    "updated_at",
    "valid_from",
    "valid_to",
];

/// A typed node in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Store-assigned unique identifier.
    pub id: String,
    /// Type label, e.g. "Person" or "Company".
    pub label: String,
    /// Property name -> scalar/array value.
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    /// Semantic embedding vector for similarity search.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Tenant-isolation scope this entity belongs to.
    pub scope_id: String,
    /// Start of temporal validity, if bounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    /// End of temporal validity, if bounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    /// IDs of the documents this entity was derived from.
    #[serde(default)]
    pub source_ids: Vec<String>,
    /// When the entity was created.
    pub created_at: DateTime<Utc>,
    /// When the entity was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Create a new entity with the given label and name in a scope.
    pub fn new(
        label: impl Into<String>,
        name: impl Into<String>,
        scope_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let mut properties = HashMap::new();
        properties.insert("name".to_string(), serde_json::Value::String(name.into()));
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            properties,
            embedding: None,
            scope_id: scope_id.into(),
            valid_from: None,
            valid_to: None,
            source_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set a property value.
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Set the embedding vector.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Set temporal validity bounds.
    pub fn with_validity(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = from;
        self.valid_to = to;
        self
    }

    /// The name-like property value: `name`, falling back to `title`.
    pub fn name(&self) -> Option<&str> {
        self.properties
            .get("name")
            .or_else(|| self.properties.get("title"))
            .and_then(|v| v.as_str())
    }

    /// Case-insensitive identity key used for per-scope deduplication.
    pub fn identity_key(&self) -> Option<String> {
        self.name().map(|n| n.trim().to_lowercase())
    }

    /// Check whether the entity is valid at the given instant.
    pub fn valid_at(&self, instant: DateTime<Utc>) -> bool {
        valid_at(self.valid_from, self.valid_to, instant)
    }

    /// Merge another entity's data into this one, keeping the richest
    /// property set. Used on re-extraction of the same named entity.
    pub fn merge_from(&mut self, other: &Entity) {
        for (key, value) in &other.properties {
            self.properties
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        for source_id in &other.source_ids {
            if !self.source_ids.contains(source_id) {
                self.source_ids.push(source_id.clone());
            }
        }
        if self.embedding.is_none() {
            self.embedding = other.embedding.clone();
        }
        if other.valid_from.is_some() {
            self.valid_from = other.valid_from;
        }
        if other.valid_to.is_some() {
            self.valid_to = other.valid_to;
        }
        self.updated_at = Utc::now();
    }
}

/// A directed, typed edge between two entities.
///
/// Relationships do not own their endpoints; they hold them by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Store-assigned unique identifier.
    pub id: String,
    /// Relationship type in UPPER_SNAKE form, e.g. "WORKS_FOR".
    pub rel_type: String,
    /// ID of the source entity.
    pub from_id: String,
    /// ID of the target entity.
    pub to_id: String,
    /// Property name -> value.
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    /// Tenant-isolation scope this relationship belongs to.
    pub scope_id: String,
    /// Start of temporal validity, if bounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    /// End of temporal validity, if bounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    /// When the relationship was created.
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// Create a new relationship between two entities.
    pub fn new(
        from_id: impl Into<String>,
        rel_type: impl Into<String>,
        to_id: impl Into<String>,
        scope_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rel_type: rel_type.into(),
            from_id: from_id.into(),
            to_id: to_id.into(),
            properties: HashMap::new(),
            scope_id: scope_id.into(),
            valid_from: None,
            valid_to: None,
            created_at: Utc::now(),
        }
    }

    /// Set a property value.
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Set temporal validity bounds.
    pub fn with_validity(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = from;
        self.valid_to = to;
        self
    }

    /// Uniqueness key: `(from, to, type, scope)`.
    pub fn edge_key(&self) -> (String, String, String, String) {
        (
            self.from_id.clone(),
            self.to_id.clone(),
            self.rel_type.clone(),
            self.scope_id.clone(),
        )
    }

    /// Check whether the relationship is valid at the given instant.
    pub fn valid_at(&self, instant: DateTime<Utc>) -> bool {
        valid_at(self.valid_from, self.valid_to, instant)
    }
}

/// A source text that contributed entities to the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Store-assigned unique identifier.
    pub id: String,
    /// Raw text of the document.
    pub text: String,
    /// SHA-256 hex digest of the text, used for per-scope deduplication.
    pub content_hash: String,
    /// Tenant-isolation scope this document belongs to.
    pub scope_id: String,
    /// Optional named-context tag, e.g. "handbook".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_tag: Option<String>,
    /// IDs of the entities this document contributed.
    #[serde(default)]
    pub entity_ids: Vec<String>,
    /// When the document was created.
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Create a new document for the given text and scope.
    pub fn new(text: impl Into<String>, scope_id: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content_hash: content_hash(&text),
            text,
            scope_id: scope_id.into(),
            context_tag: None,
            entity_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the named-context tag.
    pub fn with_context_tag(mut self, tag: impl Into<String>) -> Self {
        self.context_tag = Some(tag.into());
        self
    }
}

/// Compute the SHA-256 hex digest used to deduplicate document text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// A tenant-isolation boundary for graph data and queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// Unique identifier of the scope.
    pub id: String,
    /// Kind of scope, e.g. "user" or "project".
    pub scope_type: String,
    /// Display name.
    pub name: String,
}

impl Scope {
    /// Create a new scope.
    pub fn new(
        id: impl Into<String>,
        scope_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            scope_type: scope_type.into(),
            name: name.into(),
        }
    }
}

/// A bounded set of entities and relationships used as grounding context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subgraph {
    /// Entities reached during expansion, seeds included.
    pub entities: Vec<Entity>,
    /// Relationships traversed during expansion.
    pub relationships: Vec<Relationship>,
}

impl Subgraph {
    /// Check whether the subgraph is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

/// Counts of stored graph objects within one scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relationship_count: usize,
    pub document_count: usize,
}

fn valid_at(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    instant: DateTime<Utc>,
) -> bool {
    if let Some(from) = from {
        if instant < from {
            return false;
        }
    }
    if let Some(to) = to {
        if instant > to {
            return false;
        }
    }
    true
}
