//! OpenAI-compatible API embedding provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingProviderConfig;
use crate::error::{ProviderError, Result, ValidationError};

use super::EmbeddingProvider;

/// Embedding provider backed by an OpenAI-compatible `/embeddings`
/// endpoint. Works with OpenAI, Voyage AI, and compatible gateways.
pub struct OpenAiEmbeddingProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl OpenAiEmbeddingProvider {
    /// Create a provider from configuration. Fails fast on a missing API
    /// key or non-positive dimensions.
    pub fn from_config(config: &EmbeddingProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| ValidationError::MissingApiKey("embedding provider".to_string()))?;

        let dimensions = config
            .dimensions
            .unwrap_or_else(|| Self::model_dimensions(&config.model));
        if dimensions == 0 {
            return Err(ValidationError::NonPositiveDimensions(dimensions).into());
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            dimensions,
        })
    }

    fn model_dimensions(model: &str) -> usize {
        match model {
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            "text-embedding-ada-002" => 1536,
            "voyage-large-2" => 1536,
            "voyage-2" => 1024,
            _ => 1536,
        }
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(0)
                } else if e.is_connect() {
                    ProviderError::Connection(e.to_string())
                } else {
                    ProviderError::Api(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited.into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ProviderError::Api(format!("{status}: {message}")).into());
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Api(format!("failed to parse response: {e}")))?;

        if result.data.len() != texts.len() {
            return Err(ProviderError::Api(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            ))
            .into());
        }

        let mut data = result.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyInput.into());
        }
        let vectors = self.request_embeddings(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::EmptyResponse.into())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() || texts.iter().any(|t| t.trim().is_empty()) {
            return Err(ProviderError::EmptyInput.into());
        }
        self.request_embeddings(texts).await
    }
}
