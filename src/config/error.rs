//! Configuration Error Types
//!
//! Error handling for configuration loading and validation with specific,
//! actionable messages.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Configuration file could not be read or parsed
    #[error("Failed to load configuration from '{path}': {error}")]
    LoadFailed { path: PathBuf, error: String },

    /// Layered sources could not be deserialized into the settings tree
    #[error("Invalid configuration: {0}")]
    Deserialization(String),

    /// Missing required configuration field
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Client construction failed for a configured endpoint
    #[error("Invalid endpoint '{url}': {error}")]
    InvalidEndpoint { url: String, error: String },
}

/// Configuration result alias
pub type ConfigResult<T> = Result<T, ConfigurationError>;

impl ConfigurationError {
    pub fn missing_required_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

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

    pub fn invalid_endpoint(url: impl Into<String>, error: impl ToString) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            error: error.to_string(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Deserialization(err.to_string())
    }
}
