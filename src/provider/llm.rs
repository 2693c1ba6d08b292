//! OpenAI-compatible chat completion provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmProviderConfig;
use crate::error::{ProviderError, Result, ValidationError};

use super::{validate_temperature, LlmProvider};

/// LLM provider backed by an OpenAI-compatible `/chat/completions`
/// endpoint.
pub struct OpenAiLlmProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    default_temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl OpenAiLlmProvider {
    /// Create a provider from configuration. Fails fast on a missing API
    /// key or an out-of-range default temperature.
    pub fn from_config(config: &LlmProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| ValidationError::MissingApiKey("llm provider".to_string()))?;

        if config.model.trim().is_empty() {
            return Err(ValidationError::UnknownModel(config.model.clone()).into());
        }

        let default_temperature = validate_temperature(config.temperature)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            default_temperature,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiLlmProvider {
    async fn generate(
        &self,
        prompt: &str,
        context: Option<&str>,
        system: Option<&str>,
        temperature: Option<f32>,
    ) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(ProviderError::EmptyInput.into());
        }
        let temperature = match temperature {
            Some(t) => validate_temperature(t)?,
            None => self.default_temperature,
        };

        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system.to_string(),
            });
        }
        let content = match context {
            Some(context) if !context.is_empty() => {
                format!("Context:\n{context}\n\n{prompt}")
            }
            _ => prompt.to_string(),
        };
        messages.push(ChatMessage {
            role: "user",
            content,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature,
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

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Api(format!("failed to parse response: {e}")))?;

        let text = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse.into());
        }
        Ok(text)
    }
}
