//! Configuration for the lattice pipeline.

mod settings;

pub use settings::{
    Config, EmbeddingProviderConfig, LlmProviderConfig, PipelineConfig, ProviderKind,
    RetrievalConfig, ScopeConfig, StoreConfig, StoreKind,
};
