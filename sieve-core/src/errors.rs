use std::io;

use thiserror::Error;

/// Result type used across the sieve core crate.
pub type Result<T> = std::result::Result<T, SieveError>;

/// Canonical error representation shared by the workspace crates.
#[derive(Debug, Error)]
pub enum SieveError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("deserialization error: {0}")]
    DeserializationError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("general error: {0}")]
    GeneralError(String),
}

impl From<serde_json::Error> for SieveError {
    fn from(err: serde_json::Error) -> Self {
        SieveError::DeserializationError(err.to_string())
    }
}

impl From<anyhow::Error> for SieveError {
    fn from(err: anyhow::Error) -> Self {
        SieveError::GeneralError(err.to_string())
    }
}

/// Dedicated configuration error used by the configuration module.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for environment variable {key}: {value:?} ({reason})")]
    InvalidEnvVar {
        key: String,
        value: String,
        reason: String,
    },
}

impl From<ConfigError> for SieveError {
    fn from(value: ConfigError) -> Self {
        SieveError::ConfigError(value.to_string())
    }
}
