//! Embedding and indexing management.
//!
//! Wraps the configured [`EmbeddingProvider`] with caller-supplied
//! timeouts, synthesizes the text an entity is embedded from, and makes
//! sure the backing store has a similarity index sized to the provider's
//! dimensionality.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{ProviderError, Result};
use crate::graph::{Entity, INTERNAL_PROPERTIES};
use crate::provider::EmbeddingProvider;
use crate::store::GraphStore;

/// Maximum number of properties included in an entity's embedding text.
const MAX_EMBED_PROPERTIES: usize = 8;

/// Properties longer than this are excluded from embedding text so one
/// field cannot dominate the vector.
const MAX_PROPERTY_LEN: usize = 256;

/// Computes vectors and keeps the store's similarity index in shape.
pub struct EmbeddingManager {
    provider: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
}

impl EmbeddingManager {
    /// Create a manager over a provider with a per-call timeout.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Declared dimensionality of the provider.
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed a single text. Fails on empty input or upstream failure;
    /// never silently returns a zero vector.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyInput.into());
        }
        self.with_timeout(self.provider.embed(text)).await
    }

    /// Embed a batch of texts; order-preserving, same length as input.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(ProviderError::EmptyInput.into());
        }
        let vectors = self.with_timeout(self.provider.embed_batch(texts)).await?;
        if vectors.len() != texts.len() {
            return Err(ProviderError::Api(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            ))
            .into());
        }
        Ok(vectors)
    }

    /// Idempotently create the similarity index over entity embeddings.
    ///
    /// A dimensionality mismatch between the provider and an existing
    /// index is a fatal configuration error, surfaced by the store.
    pub async fn ensure_index(&self, store: &dyn GraphStore) -> Result<()> {
        debug!(dimensions = self.provider.dimensions(), "ensuring vector index");
        store.ensure_vector_index(self.provider.dimensions()).await
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.timeout.as_millis() as u64).into()),
        }
    }
}

/// Synthesize the text an entity is embedded from.
///
/// Label and name first, then up to [`MAX_EMBED_PROPERTIES`] short
/// properties in sorted key order. Internal fields, over-long values, and
/// values duplicating the already-included name or description are
/// excluded to avoid vector collapse from repeated tokens.
pub fn entity_embedding_text(entity: &Entity) -> String {
    let name = entity.name().unwrap_or_default();
    let mut parts = vec![format!("{} {}", entity.label, name)];

    let description = entity
        .properties
        .get("description")
        .and_then(|v| v.as_str())
        .filter(|d| d.len() <= MAX_PROPERTY_LEN && !d.eq_ignore_ascii_case(name));
    if let Some(description) = description {
        parts.push(description.to_string());
    }

    let mut keys: Vec<&String> = entity
        .properties
        .keys()
        .filter(|k| {
            let k = k.as_str();
            !INTERNAL_PROPERTIES.contains(&k) && k != "name" && k != "title" && k != "description"
        })
        .collect();
    keys.sort();

    let mut included = 0;
    for key in keys {
        if included >= MAX_EMBED_PROPERTIES {
            break;
        }
        let value = &entity.properties[key];
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
            other => other.to_string(),
        };
        if rendered.is_empty() || rendered.len() > MAX_PROPERTY_LEN {
            continue;
        }
        // Skip values that repeat what the header already says.
        if rendered.eq_ignore_ascii_case(name)
            || description.is_some_and(|d| rendered.eq_ignore_ascii_case(d))
        {
            continue;
        }
        parts.push(format!("{key}: {rendered}"));
        included += 1;
    }

    parts.join(". ")
}

/// Cosine similarity of two vectors. Zero for mismatched lengths or
/// zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
