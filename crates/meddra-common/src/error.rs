//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Main error type for the shared helpers
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidEnv {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Environment variable {0} is required but not set")]
    MissingEnv(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CommonError {
    /// Create an invalid environment value error
    pub fn invalid_env(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidEnv {
            key: key.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}
