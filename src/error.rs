//! # Structured Error Handling
//!
//! Crate-level error type. Component errors (`MessagingError`, `RemoteError`,
//! `ConfigurationError`) convert into [`MigratorError`] with `?`.

use std::error::Error as StdError;

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::remote::RemoteError;

/// Errors surfaced by the migration engine
#[derive(Error, Debug)]
pub enum MigratorError {
    #[error("Configuration not found: {config_id}")]
    ConfigNotFound { config_id: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Remote call failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Storage error: {location}: {message}")]
    Storage { location: String, message: String },

    #[error("Malformed job: {0}")]
    MalformedJob(String),

    #[error("Invalid metadata bundle: missing key {missing}")]
    InvalidBundle { missing: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Crate result alias
pub type MigratorResult<T> = std::result::Result<T, MigratorError>;

impl MigratorError {
    pub fn config_not_found(config_id: impl Into<String>) -> Self {
        Self::ConfigNotFound {
            config_id: config_id.into(),
        }
    }

    pub fn storage(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedJob(message.into())
    }

    pub fn invalid_bundle(missing: impl Into<String>) -> Self {
        Self::InvalidBundle {
            missing: missing.into(),
        }
    }

    /// Whether a retry could plausibly succeed
    ///
    /// Structurally invalid input (malformed jobs, invalid bundles, missing
    /// configuration) is never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConfigNotFound { .. }
            | Self::MalformedJob(_)
            | Self::InvalidBundle { .. }
            | Self::Serialization(_)
            | Self::Configuration(_) => false,
            Self::Remote(remote) => remote.is_retryable(),
            Self::Messaging(_) | Self::Storage { .. } | Self::Internal(_) => true,
        }
    }

    /// Stable kind name, written to the `x-error-name` header
    pub fn error_name(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } => "ConfigNotFound",
            Self::Configuration(_) => "ConfigurationError",
            Self::Messaging(_) => "MessagingError",
            Self::Remote(_) => "RemoteError",
            Self::Storage { .. } => "StorageError",
            Self::MalformedJob(_) => "MalformedJob",
            Self::InvalidBundle { .. } => "InvalidBundle",
            Self::Serialization(_) => "SerializationError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// HTTP context when the failure came from a remote call
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(remote) => Some(remote),
            _ => None,
        }
    }

    /// Short machine-readable reason, written to the `x-failure-reason` header
    pub fn failure_reason(&self) -> &'static str {
        match self {
            Self::Remote(remote) if remote.is_timeout() => "timeout",
            Self::Remote(_) => "remote_error",
            Self::MalformedJob(_) => "malformed_job",
            Self::InvalidBundle { .. } => "validation_failed",
            Self::ConfigNotFound { .. } => "config_not_found",
            _ => "handler_error",
        }
    }

    /// The error followed by each of its sources, outermost first
    pub fn chain(&self) -> String {
        let mut parts = vec![self.to_string()];
        let mut source = self.source();
        while let Some(err) = source {
            parts.push(err.to_string());
            source = err.source();
        }
        parts.join("\n  caused by: ")
    }
}
