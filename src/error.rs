//! Error types for the agent execution core

use thiserror::Error;

/// Result type alias using the core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the agent execution core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM provider error (transport, auth, or protocol failure)
    #[error("LLM provider error: {0}")]
    Llm(String),

    /// History-store / persistence error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unauthorized access (session does not belong to the caller)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limit exceeded by the LLM provider
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Generic internal error — collaborator faults (LLM transport, storage)
    /// surface as this variant and become a stream-level `INTERNAL_ERROR`.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::RateLimit(_) | Error::Database(_)
        )
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::NotFound(_) | Error::Unauthorized(_)
        )
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
