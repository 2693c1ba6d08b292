//! Deterministic textualization of subgraphs.

use std::collections::HashMap;

use crate::graph::{Subgraph, INTERNAL_PROPERTIES};

/// Render a subgraph as grounding context text.
///
/// Entities render as blocks (label, name, non-internal properties) and
/// relationships as `A --[TYPE]--> B` lines. Entities and relationships
/// are each ordered by id and output is truncated to `char_budget`, so
/// identical subgraphs always format identically.
pub fn format_subgraph(subgraph: &Subgraph, char_budget: usize) -> String {
    let mut entities: Vec<_> = subgraph.entities.iter().collect();
    entities.sort_by(|a, b| a.id.cmp(&b.id));
    let mut relationships: Vec<_> = subgraph.relationships.iter().collect();
    relationships.sort_by(|a, b| a.id.cmp(&b.id));

    let names: HashMap<&str, &str> = entities
        .iter()
        .map(|e| (e.id.as_str(), e.name().unwrap_or(e.id.as_str())))
        .collect();

    let mut blocks = Vec::new();
    for entity in &entities {
        let mut block = format!(
            "{}: {}",
            entity.label,
            entity.name().unwrap_or(entity.id.as_str())
        );
        let mut keys: Vec<&String> = entity
            .properties
            .keys()
            .filter(|k| {
                let k = k.as_str();
                !INTERNAL_PROPERTIES.contains(&k) && k != "name" && k != "title"
            })
            .collect();
        keys.sort();
        for key in keys {
            let value = &entity.properties[key];
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            block.push_str(&format!("\n  {key}: {rendered}"));
        }
        blocks.push(block);
    }

    for rel in &relationships {
        let from = names
            .get(rel.from_id.as_str())
            .copied()
            .unwrap_or(rel.from_id.as_str());
        let to = names
            .get(rel.to_id.as_str())
            .copied()
            .unwrap_or(rel.to_id.as_str());
        blocks.push(format!("{from} --[{}]--> {to}", rel.rel_type));
    }

    let mut output = String::new();
    for block in blocks {
        // Stop at the budget rather than emitting a partial block.
        let extra = block.len() + if output.is_empty() { 0 } else { 2 };
        if output.len() + extra > char_budget {
            break;
        }
        if !output.is_empty() {
            output.push_str("\n\n");
        }
        output.push_str(&block);
    }
    output
}
