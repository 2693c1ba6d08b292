//! Retrieval engine: seed search, subgraph expansion, formatting.
//!
//! Seed search prefers the store's native vector index and falls back to
//! a brute-force cosine scan when none exists; both paths apply the same
//! scope, temporal, and context filters before ranking and must produce
//! identical rankings for identical data. Expansion is a breadth-first
//! traversal bounded by hop count and node count that never crosses
//! scope boundaries.

mod format;

pub use format::format_subgraph;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{LatticeError, ProviderError, Result};
use crate::graph::{Entity, Subgraph};
use crate::indexing::cosine_similarity;
use crate::store::{EntityFilter, GraphStore};

/// Options for one retrieval run.
#[derive(Debug, Clone, Default)]
pub struct RetrievalFilter {
    /// Only consider graph objects valid at this instant.
    pub valid_at: Option<DateTime<Utc>>,
    /// Only consider entities derived from documents with this tag.
    pub context_tag: Option<String>,
}

impl RetrievalFilter {
    fn to_entity_filter(&self) -> EntityFilter {
        EntityFilter {
            require_embedding: true,
            valid_at: self.valid_at,
            context_tag: self.context_tag.clone(),
            ..Default::default()
        }
    }
}

/// Finds seed entities and expands them into a bounded subgraph.
pub struct RetrievalEngine {
    store: Arc<dyn GraphStore>,
}

impl RetrievalEngine {
    /// Create an engine over a graph store.
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Find seed entities for a query vector.
    ///
    /// Uses the store's vector index when available, otherwise scans all
    /// in-scope embeddings. Seeds scoring below `min_similarity` are
    /// excluded even when they would rank within `top_k`.
    pub async fn find_seeds(
        &self,
        query_vector: &[f32],
        scope_id: &str,
        top_k: usize,
        filter: &RetrievalFilter,
        min_similarity: f32,
    ) -> Result<Vec<(Entity, f32)>> {
        let entity_filter = filter.to_entity_filter();

        let mut scored = match self
            .store
            .find_by_vector(query_vector, scope_id, top_k, &entity_filter)
            .await
        {
            Ok(scored) => scored,
            Err(LatticeError::Provider(ProviderError::SearchUnavailable(reason))) => {
                debug!(%reason, "vector index unavailable, falling back to linear scan");
                self.brute_force_seeds(query_vector, scope_id, top_k, &entity_filter)
                    .await?
            }
            Err(e) => return Err(e),
        };

        scored.retain(|(_, score)| *score >= min_similarity);
        Ok(scored)
    }

    /// Linear-scan fallback: cosine similarity over all in-scope entity
    /// embeddings, ranked descending. Must match the index path's ranking.
    async fn brute_force_seeds(
        &self,
        query_vector: &[f32],
        scope_id: &str,
        top_k: usize,
        filter: &EntityFilter,
    ) -> Result<Vec<(Entity, f32)>> {
        let entities = self.store.list_entities(scope_id, filter).await?;
        let mut scored: Vec<(Entity, f32)> = entities
            .into_iter()
            .map(|e| {
                let score = cosine_similarity(query_vector, e.embedding.as_deref().unwrap_or(&[]));
                (e, score)
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

    /// Breadth-first expansion from seeds up to `hop_limit` hops,
    /// accumulating at most `max_nodes` entities. Traversal stays inside
    /// the scope and, when a temporal filter is active, only follows
    /// relationships and entities valid at that instant.
    pub async fn expand(
        &self,
        seeds: &[Entity],
        scope_id: &str,
        hop_limit: usize,
        max_nodes: usize,
        filter: &RetrievalFilter,
    ) -> Result<Subgraph> {
        let mut subgraph = Subgraph::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut seen_rels: HashSet<String> = HashSet::new();
        let mut frontier: Vec<String> = Vec::new();

        for seed in seeds {
            if subgraph.entities.len() >= max_nodes {
                break;
            }
            if visited.insert(seed.id.clone()) {
                subgraph.entities.push(seed.clone());
                frontier.push(seed.id.clone());
            }
        }

        for _hop in 0..hop_limit {
            if frontier.is_empty() || subgraph.entities.len() >= max_nodes {
                break;
            }
            let mut next_frontier = Vec::new();
            for entity_id in frontier {
                let relationships = self
                    .store
                    .relationships_involving(&entity_id, scope_id)
                    .await?;
                for rel in relationships {
                    if let Some(instant) = filter.valid_at {
                        if !rel.valid_at(instant) {
                            continue;
                        }
                    }
                    let other_id = if rel.from_id == entity_id {
                        rel.to_id.clone()
                    } else {
                        rel.from_id.clone()
                    };

                    if !visited.contains(&other_id) {
                        if subgraph.entities.len() >= max_nodes {
                            continue;
                        }
                        let Some(other) = self.store.get_entity(&other_id, scope_id).await? else {
                            continue;
                        };
                        if let Some(instant) = filter.valid_at {
                            if !other.valid_at(instant) {
                                continue;
                            }
                        }
                        visited.insert(other_id.clone());
                        subgraph.entities.push(other);
                        next_frontier.push(other_id.clone());
                    }

                    // Keep the edge once both endpoints are in the subgraph.
                    if visited.contains(&rel.from_id)
                        && visited.contains(&rel.to_id)
                        && seen_rels.insert(rel.id.clone())
                    {
                        subgraph.relationships.push(rel);
                    }
                }
            }
            frontier = next_frontier;
        }

        debug!(
            entities = subgraph.entities.len(),
            relationships = subgraph.relationships.len(),
            "subgraph expanded"
        );
        Ok(subgraph)
    }
}
