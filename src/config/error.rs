//! Configuration Error Types

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Layered configuration could not be built or deserialized
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    /// Configuration file was requested explicitly but does not exist
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },
}

impl ConfigurationError {
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl ToString,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::LoadError(err.to_string())
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;
