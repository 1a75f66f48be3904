use thiserror::Error;

/// Errors returned by the memory engine
#[derive(Debug, Error)]
pub enum Error {
    /// Empty or malformed prompt, response, vector or field value
    #[error("validation error: {0}")]
    Validation(String),

    /// The embedding provider could not produce a vector
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Malformed query vector handed to the ranker
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("memory not found: {0}")]
    NotFound(i64),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::EmbeddingFailed(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
