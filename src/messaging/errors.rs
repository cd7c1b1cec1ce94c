//! # Messaging Error Types
//!
//! Broker-level failures. Connection loss is distinguished from per-queue
//! failures so callers can wait for the supervisor to reconnect.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Broker not initialized: call connect() first")]
    NotInitialized,

    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Connection failed after {attempts} attempts: {message}")]
    ConnectRetriesExhausted { attempts: u32, message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    pub fn queue_creation(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, "declare", message)
    }

    pub fn send(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, "publish", message)
    }

    pub fn receive(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, "receive", message)
    }

    pub fn ack(queue_name: impl Into<String>, delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, format!("ack(tag={delivery_tag})"), message)
    }

    pub fn nack(
        queue_name: impl Into<String>,
        delivery_tag: u64,
        message: impl Into<String>,
    ) -> Self {
        Self::queue_operation(queue_name, format!("nack(tag={delivery_tag})"), message)
    }

    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn invalid_receipt_handle(handle: impl Into<String>) -> Self {
        Self::Internal {
            message: format!("Invalid receipt handle: {}", handle.into()),
        }
    }

    pub fn health_check(message: impl Into<String>) -> Self {
        Self::Internal {
            message: format!("health_check: {}", message.into()),
        }
    }

    /// Whether the failure is the broker connection going away
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized | Self::Connection { .. } | Self::ConnectRetriesExhausted { .. }
        )
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        Self::message_serialization(err.to_string())
    }
}

impl From<lapin::Error> for MessagingError {
    fn from(err: lapin::Error) -> Self {
        Self::connection(err.to_string())
    }
}
