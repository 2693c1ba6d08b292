//! Ontology declarations used to validate extraction output.
//!
//! An ontology is the closed set of entity types (with required properties)
//! and relationship types (with allowed endpoint type pairs) that the
//! extraction engine is allowed to produce. A default ontology covering
//! common people/organization knowledge applies when none is configured.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::SchemaError;
use crate::graph::{Entity, Relationship};

/// Declaration of one entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTypeDef {
    /// Type label, e.g. "Person".
    pub label: String,
    /// Properties that every entity of this type must carry.
    #[serde(default)]
    pub required_properties: Vec<String>,
    /// Short description included in the extraction prompt.
    #[serde(default)]
    pub description: Option<String>,
}

impl EntityTypeDef {
    /// Create a new entity type declaration.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            required_properties: vec!["name".to_string()],
            description: None,
        }
    }

    /// Set the required properties.
    pub fn with_required(mut self, properties: impl IntoIterator<Item = &'static str>) -> Self {
        self.required_properties = properties.into_iter().map(String::from).collect();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Declaration of one relationship type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipTypeDef {
    /// Type token in UPPER_SNAKE form, e.g. "WORKS_FOR".
    pub rel_type: String,
    /// Entity type labels allowed as the source endpoint.
    pub from_types: Vec<String>,
    /// Entity type labels allowed as the target endpoint.
    pub to_types: Vec<String>,
    /// Short description included in the extraction prompt.
    #[serde(default)]
    pub description: Option<String>,
}

impl RelationshipTypeDef {
    /// Create a new relationship type declaration.
    pub fn new(
        rel_type: impl Into<String>,
        from_types: impl IntoIterator<Item = &'static str>,
        to_types: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        Self {
            rel_type: rel_type.into(),
            from_types: from_types.into_iter().map(String::from).collect(),
            to_types: to_types.into_iter().map(String::from).collect(),
            description: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check whether the given endpoint labels are declared for this type.
    pub fn allows(&self, from_label: &str, to_label: &str) -> bool {
        self.from_types.iter().any(|t| t == from_label)
            && self.to_types.iter().any(|t| t == to_label)
    }
}

/// The declared entity and relationship types for one deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ontology {
    entity_types: HashMap<String, EntityTypeDef>,
    relationship_types: HashMap<String, RelationshipTypeDef>,
}

impl Ontology {
    /// Create an empty ontology.
    pub fn new() -> Self {
        Self {
            entity_types: HashMap::new(),
            relationship_types: HashMap::new(),
        }
    }

    /// Add an entity type declaration.
    pub fn with_entity_type(mut self, def: EntityTypeDef) -> Self {
        self.entity_types.insert(def.label.clone(), def);
        self
    }

    /// Add a relationship type declaration.
    pub fn with_relationship_type(mut self, def: RelationshipTypeDef) -> Self {
        self.relationship_types.insert(def.rel_type.clone(), def);
        self
    }

    /// Look up an entity type by label.
    pub fn entity_type(&self, label: &str) -> Option<&EntityTypeDef> {
        self.entity_types.get(label)
    }

    /// Look up a relationship type by token.
    pub fn relationship_type(&self, rel_type: &str) -> Option<&RelationshipTypeDef> {
        self.relationship_types.get(rel_type)
    }

    /// All declared entity types, sorted by label for stable prompts.
    pub fn entity_types(&self) -> Vec<&EntityTypeDef> {
        let mut types: Vec<_> = self.entity_types.values().collect();
        types.sort_by(|a, b| a.label.cmp(&b.label));
        types
    }

    /// All declared relationship types, sorted by token for stable prompts.
    pub fn relationship_types(&self) -> Vec<&RelationshipTypeDef> {
        let mut types: Vec<_> = self.relationship_types.values().collect();
        types.sort_by(|a, b| a.rel_type.cmp(&b.rel_type));
        types
    }

    /// Validate an entity against the declared types.
    pub fn validate_entity(&self, entity: &Entity) -> Result<(), SchemaError> {
        let def = self
            .entity_types
            .get(&entity.label)
            .ok_or_else(|| SchemaError::UnknownEntityType(entity.label.clone()))?;

        for property in &def.required_properties {
            if !entity.properties.contains_key(property) {
                return Err(SchemaError::MissingRequiredProperty {
                    label: entity.label.clone(),
                    name: entity.name().unwrap_or("<unnamed>").to_string(),
                    property: property.clone(),
                });
            }
        }
        Ok(())
    }

    /// Validate a relationship's type and endpoint labels.
    pub fn validate_relationship(
        &self,
        relationship: &Relationship,
        from_label: &str,
        to_label: &str,
    ) -> Result<(), SchemaError> {
        if relationship.from_id == relationship.to_id {
            return Err(SchemaError::SelfLoop(relationship.from_id.clone()));
        }

        let def = self
            .relationship_types
            .get(&relationship.rel_type)
            .ok_or_else(|| SchemaError::UnknownRelationshipType(relationship.rel_type.clone()))?;

        if !def.allows(from_label, to_label) {
            return Err(SchemaError::EndpointTypeMismatch {
                rel_type: relationship.rel_type.clone(),
                from: from_label.to_string(),
                to: to_label.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for Ontology {
    /// The default ontology: common knowledge-graph types covering people,
    /// organizations, places, and topics.
    fn default() -> Self {
        Ontology::new()
            .with_entity_type(
                EntityTypeDef::new("Person").with_description("A named individual"),
            )
            .with_entity_type(
                EntityTypeDef::new("Organization")
                    .with_description("A company, team, or institution"),
            )
            .with_entity_type(
                EntityTypeDef::new("Location").with_description("A physical place"),
            )
            .with_entity_type(
                EntityTypeDef::new("Product")
                    .with_description("A product, service, or artifact"),
            )
            .with_entity_type(
                EntityTypeDef::new("Event")
                    .with_description("Something that happened at a point in time"),
            )
            .with_entity_type(
                EntityTypeDef::new("Concept")
                    .with_description("An abstract topic or idea"),
            )
            .with_relationship_type(RelationshipTypeDef::new(
                "WORKS_FOR",
                ["Person"],
                ["Organization"],
            ))
            .with_relationship_type(RelationshipTypeDef::new(
                "KNOWS",
                ["Person"],
                ["Person"],
            ))
            .with_relationship_type(RelationshipTypeDef::new(
                "LOCATED_IN",
                ["Person", "Organization", "Event"],
                ["Location"],
            ))
            .with_relationship_type(RelationshipTypeDef::new(
                "PART_OF",
                ["Organization", "Location", "Product"],
                ["Organization", "Location", "Product"],
            ))
            .with_relationship_type(RelationshipTypeDef::new(
                "PRODUCES",
                ["Organization", "Person"],
                ["Product"],
            ))
            .with_relationship_type(RelationshipTypeDef::new(
                "PARTICIPATED_IN",
                ["Person", "Organization"],
                ["Event"],
            ))
            .with_relationship_type(RelationshipTypeDef::new(
                "RELATED_TO",
                ["Person", "Organization", "Location", "Product", "Event", "Concept"],
                ["Person", "Organization", "Location", "Product", "Event", "Concept"],
            ))
    }
}
