//! Provider abstractions for embeddings and text generation.
//!
//! The pipeline depends only on the [`EmbeddingProvider`] and
//! [`LlmProvider`] traits; concrete vendors hide behind them. Selection
//! happens once at construction from configuration, never per call, and a
//! misconfigured provider fails fast with a [`ValidationError`] rather
//! than on first use.

mod embedding;
mod llm;

pub use embedding::OpenAiEmbeddingProvider;
pub use llm::OpenAiLlmProvider;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EmbeddingProviderConfig, LlmProviderConfig, ProviderKind};
use crate::error::{Result, ValidationError};

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Declared dimensionality of the produced vectors.
    fn dimensions(&self) -> usize;

    /// Embed a single text. Fails on empty input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, order-preserving and same length as the
    /// input. Fails on empty input or any empty element.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Trait for LLM text-generation providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for a prompt with optional grounding context
    /// and system message. Temperature domain is [0, 2]. Fails on an empty
    /// prompt or an empty upstream response.
    async fn generate(
        &self,
        prompt: &str,
        context: Option<&str>,
        system: Option<&str>,
        temperature: Option<f32>,
    ) -> Result<String>;
}

/// Create an embedding provider from configuration.
pub fn create_embedding_provider(
    config: &EmbeddingProviderConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.kind {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiEmbeddingProvider::from_config(config)?)),
    }
}

/// Create an LLM provider from configuration.
pub fn create_llm_provider(config: &LlmProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    match config.kind {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiLlmProvider::from_config(config)?)),
    }
}

/// Validate a temperature argument against the [0, 2] domain.
pub(crate) fn validate_temperature(temperature: f32) -> Result<f32> {
    if !(0.0..=2.0).contains(&temperature) || temperature.is_nan() {
        return Err(ValidationError::TemperatureOutOfRange(temperature).into());
    }
    Ok(temperature)
}
