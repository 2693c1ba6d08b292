//! Configuration settings for the lattice pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ValidationError};
use crate::ontology::Ontology;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scope: ScopeConfig,
    pub store: StoreConfig,
    pub embedding: EmbeddingProviderConfig,
    pub llm: LlmProviderConfig,
    pub pipeline: PipelineConfig,
    pub retrieval: RetrievalConfig,
    /// Optional path to a JSON file declaring a custom ontology. The
    /// default ontology applies when unset.
    pub ontology_path: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(ValidationError::ReadFile)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ValidationError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from conventional locations or use defaults.
    pub fn load() -> Result<Self> {
        let config_paths = [
            PathBuf::from("lattice.toml"),
            dirs::config_dir()
                .map(|p| p.join("lattice/config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".lattice/config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Load the declared ontology, or the default one when no custom
    /// ontology is configured.
    pub fn ontology(&self) -> Result<Ontology> {
        match &self.ontology_path {
            Some(path) => {
                let expanded = shellexpand::tilde(path);
                let content = std::fs::read_to_string(expanded.as_ref())
                    .map_err(ValidationError::ReadFile)?;
                let ontology: Ontology = serde_json::from_str(&content)?;
                Ok(ontology)
            }
            None => Ok(Ontology::default()),
        }
    }

    /// Validate the configuration. Fatal at construction time.
    pub fn validate(&self) -> Result<()> {
        if self.scope.id.is_empty() {
            return Err(ValidationError::MissingField("scope.id".to_string()).into());
        }
        if self.embedding.base_url.is_empty() {
            return Err(ValidationError::MissingField("embedding.base_url".to_string()).into());
        }
        if self.embedding.model.is_empty() {
            return Err(ValidationError::MissingField("embedding.model".to_string()).into());
        }
        if let Some(dims) = self.embedding.dimensions {
            if dims == 0 {
                return Err(ValidationError::NonPositiveDimensions(dims).into());
            }
        }
        if self.llm.base_url.is_empty() {
            return Err(ValidationError::MissingField("llm.base_url".to_string()).into());
        }
        if self.llm.model.is_empty() {
            return Err(ValidationError::MissingField("llm.model".to_string()).into());
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ValidationError::TemperatureOutOfRange(self.llm.temperature).into());
        }
        if self.pipeline.max_concurrent == 0 {
            return Err(
                ValidationError::Invalid("pipeline.max_concurrent must be > 0".to_string()).into(),
            );
        }
        if self.retrieval.top_k == 0 {
            return Err(ValidationError::Invalid("retrieval.top_k must be > 0".to_string()).into());
        }
        if self.retrieval.max_nodes == 0 {
            return Err(
                ValidationError::Invalid("retrieval.max_nodes must be > 0".to_string()).into(),
            );
        }
        Ok(())
    }
}

/// Scope descriptor: the tenant every operation runs under.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    pub id: String,
    pub scope_type: String,
    pub name: String,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            scope_type: "workspace".to_string(),
            name: "Default".to_string(),
        }
    }
}

/// Graph store backend selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
}

/// Available graph store backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-memory store with a built-in vector index.
    #[default]
    Memory,
}

/// Provider vendor selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Any OpenAI-compatible API endpoint.
    #[default]
    OpenAi,
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    /// API key; falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    /// Vector dimensionality override; inferred from the model when unset.
    pub dimensions: Option<usize>,
    pub timeout_secs: u64,
}

impl Default for EmbeddingProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            dimensions: None,
            timeout_secs: 30,
        }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    /// API key; falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    /// Default sampling temperature, domain [0, 2].
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.7,
            timeout_secs: 60,
        }
    }
}

/// Pipeline orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum concurrent learn calls inside a batch. 1 = sequential.
    pub max_concurrent: usize,
    /// Timeout applied to every provider call, in seconds.
    pub provider_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            provider_timeout_secs: 120,
        }
    }
}

/// Retrieval defaults, overridable per query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Seed entities to fetch from vector search.
    pub top_k: usize,
    /// Maximum hops when expanding the subgraph.
    pub hop_limit: usize,
    /// Maximum entities the expanded subgraph may contain.
    pub max_nodes: usize,
    /// Seeds scoring below this cosine similarity are dropped.
    pub min_similarity: f32,
    /// Character budget for the formatted grounding context.
    pub context_char_budget: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            hop_limit: 2,
            max_nodes: 50,
            min_similarity: 0.3,
            context_char_budget: 6000,
        }
    }
}
