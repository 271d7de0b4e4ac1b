//! Configuration Error Types
//!
//! Error handling for configuration loading and validation.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Explicitly requested configuration file does not exist
    #[error("Configuration file not found: {path}")]
    ConfigFileNotFound { path: PathBuf },

    /// Source could not be read or merged by the loader
    #[error("Failed to load configuration: {error}")]
    LoadFailed { error: String },

    /// Merged sources did not match the expected structure
    #[error("Failed to deserialize configuration: {error}")]
    DeserializationFailed { error: String },

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
        match err {
            config::ConfigError::Type { .. } | config::ConfigError::Message(_) => {
                Self::DeserializationFailed {
                    error: err.to_string(),
                }
            }
            _ => Self::LoadFailed {
                error: err.to_string(),
            },
        }
    }
}

/// Result alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;
