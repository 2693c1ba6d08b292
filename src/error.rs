//! Error types for the lattice pipeline.

use thiserror::Error;

/// Main error type for lattice operations.
#[derive(Error, Debug)]
pub enum LatticeError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Upstream provider failures (embedding, LLM, graph store).
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Rate limited")]
    RateLimited,

    #[error("Empty input")]
    EmptyInput,

    #[error("Empty response from provider")]
    EmptyResponse,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Vector index error: {0}")]
    Index(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Vector search unavailable: {0}")]
    SearchUnavailable(String),
}

/// Malformed configuration. Fatal at construction time.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing API key: {0}")]
    MissingApiKey(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Temperature {0} out of range [0, 2]")]
    TemperatureOutOfRange(f32),

    #[error("Embedding dimensions must be positive, got {0}")]
    NonPositiveDimensions(usize),

    #[error("Dimension mismatch: index has {index}, provider declares {provider}")]
    DimensionMismatch { index: usize, provider: usize },

    #[error("Failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Model output could not be parsed into the extraction schema.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Unparsable model output after corrective retry: {0}")]
    Unparsable(String),

    #[error("Model returned empty output")]
    EmptyOutput,
}

/// Entity or relationship violates ontology constraints.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Unknown relationship type: {0}")]
    UnknownRelationshipType(String),

    #[error("Entity '{name}' of type {label} missing required property '{property}'")]
    MissingRequiredProperty {
        label: String,
        name: String,
        property: String,
    },

    #[error("Relationship type {rel_type} does not allow endpoints ({from}, {to})")]
    EndpointTypeMismatch {
        rel_type: String,
        from: String,
        to: String,
    },

    #[error("Self-referential relationship on entity {0}")]
    SelfLoop(String),
}

/// Result type alias for lattice operations.
pub type Result<T> = std::result::Result<T, LatticeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LatticeError::Validation(ValidationError::MissingApiKey("llm".to_string()));
        assert!(err.to_string().contains("llm"));
    }

    #[test]
    fn test_error_conversion() {
        let err: LatticeError = ProviderError::EmptyInput.into();
        assert!(matches!(
            err,
            LatticeError::Provider(ProviderError::EmptyInput)
        ));
    }

    #[test]
    fn test_temperature_error_message() {
        let err = ValidationError::TemperatureOutOfRange(3.5);
        assert!(err.to_string().contains("3.5"));
    }
}
