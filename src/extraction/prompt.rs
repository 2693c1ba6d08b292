//! Prompt construction and response parsing for extraction.

use serde::Deserialize;
use std::collections::HashMap;

use crate::ontology::Ontology;

/// System message for extraction requests.
pub const EXTRACTION_SYSTEM: &str = "You are an information extraction engine. \
You read text and return a knowledge graph as strict JSON. \
Respond with JSON only, no prose and no markdown fences.";

/// Candidate entity as produced by the model, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEntity {
    /// Entity type label.
    #[serde(rename = "type", alias = "label")]
    pub label: String,
    /// Name-like identifier; may instead appear inside `properties`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

impl RawEntity {
    /// The candidate's name: top-level field or name/title property.
    pub fn resolved_name(&self) -> Option<String> {
        self.name
            .clone()
            .or_else(|| {
                self.properties
                    .get("name")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            })
            .or_else(|| {
                self.properties
                    .get("title")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            })
            .filter(|n| !n.trim().is_empty())
    }
}

/// Candidate relationship as produced by the model, endpoints by name.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRelationship {
    pub from: String,
    pub to: String,
    #[serde(rename = "type", alias = "rel_type")]
    pub rel_type: String,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

/// The model's full structured response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawExtraction {
    #[serde(default)]
    pub entities: Vec<RawEntity>,
    #[serde(default)]
    pub relationships: Vec<RawRelationship>,
    #[serde(default)]
    pub summary: String,
}

/// Build the structured extraction prompt for a text and ontology.
pub fn build_extraction_prompt(text: &str, ontology: &Ontology) -> String {
    let mut entity_lines = String::new();
    for def in ontology.entity_types() {
        entity_lines.push_str(&format!(
            "- {} (required properties: {}){}\n",
            def.label,
            def.required_properties.join(", "),
            def.description
                .as_deref()
                .map(|d| format!(": {d}"))
                .unwrap_or_default()
        ));
    }

    let mut relationship_lines = String::new();
    for def in ontology.relationship_types() {
        relationship_lines.push_str(&format!(
            "- {} (from: {}; to: {})\n",
            def.rel_type,
            def.from_types.join("|"),
            def.to_types.join("|")
        ));
    }

    format!(
        r#"Extract entities and relationships from the text below.

Allowed entity types:
{entity_lines}
Allowed relationship types:
{relationship_lines}
Rules:
- Use only the allowed types.
- Every entity needs a "name" property.
- Relationship "from" and "to" must be entity names from your own output.
- Never relate an entity to itself.

Return exactly this JSON shape:
{{
  "entities": [{{"type": "Person", "properties": {{"name": "Alice"}}}}],
  "relationships": [{{"from": "Alice", "to": "Acme Corp", "type": "WORKS_FOR", "properties": {{}}}}],
  "summary": "one sentence describing the text"
}}

Text:
{text}"#
    )
}

/// Build the corrective prompt used for the single re-parse retry.
pub fn build_retry_prompt(original_prompt: &str, bad_output: &str, parse_error: &str) -> String {
    format!(
        "{original_prompt}\n\nYour previous response could not be parsed.\n\
        Parse error: {parse_error}\n\
        Previous response:\n{bad_output}\n\n\
        Respond again with ONLY the valid JSON object, nothing else."
    )
}

/// Parse the model output into a raw extraction, tolerating surrounding
/// prose or markdown fences by slicing the outermost JSON object.
pub fn parse_extraction(output: &str) -> Result<RawExtraction, String> {
    let trimmed = output.trim();
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => return Err("no JSON object found in output".to_string()),
    };
    serde_json::from_str(candidate).map_err(|e| e.to_string())
}
