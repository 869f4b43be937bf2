//! Common error types for stemcap

use thiserror::Error;

/// Common result type for stemcap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the stemcap crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Song list could not be parsed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error (stats dump)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid user input or configuration value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not permitted in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
