//! # Messaging Types
//!
//! Provider-agnostic envelopes exchanged with the broker.

use std::collections::BTreeMap;
use std::fmt;

/// Handle for acknowledging a received message
///
/// RabbitMQ uses the delivery tag; the in-memory provider its own counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ReceiptHandle {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ReceiptHandle {
    fn from(handle: &str) -> Self {
        Self(handle.to_string())
    }
}

/// Header value subset the engine reads and writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Int(i64),
    Text(String),
}

impl HeaderValue {
    /// Integer view; numeric text is accepted since other publishers may stringify
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(value) => Some(*value),
            HeaderValue::Text(text) => text.parse().ok(),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            HeaderValue::Int(value) => value.to_string(),
            HeaderValue::Text(text) => text.clone(),
        }
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<u32> for HeaderValue {
    fn from(value: u32) -> Self {
        HeaderValue::Int(i64::from(value))
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

pub type MessageHeaders = BTreeMap<String, HeaderValue>;

/// A message pulled from a queue, not yet acknowledged
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: String,
    pub receipt_handle: ReceiptHandle,
    pub payload: Vec<u8>,
    pub headers: MessageHeaders,
    /// The broker has delivered this message before
    pub redelivered: bool,
}

/// Arguments for declaring a queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_routing_key: Option<String>,
}

impl QueueOptions {
    pub fn durable() -> Self {
        Self {
            durable: true,
            ..Default::default()
        }
    }

    /// Durable queue dead-lettering through the default exchange to `target`
    pub fn dead_lettered_to(target: impl Into<String>) -> Self {
        Self {
            durable: true,
            dead_letter_exchange: Some(String::new()),
            dead_letter_routing_key: Some(target.into()),
        }
    }
}

/// Result of checking that expected queues exist
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueHealthReport {
    pub healthy: Vec<String>,
    pub missing: Vec<String>,
    pub errors: Vec<(String, String)>,
}

impl QueueHealthReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_healthy(&self) -> bool {
        self.missing.is_empty() && self.errors.is_empty()
    }

    pub fn add_healthy(&mut self, queue_name: impl Into<String>) {
        self.healthy.push(queue_name.into());
    }

    pub fn add_missing(&mut self, queue_name: impl Into<String>) {
        self.missing.push(queue_name.into());
    }

    pub fn add_error(&mut self, queue_name: impl Into<String>, error: impl Into<String>) {
        self.errors.push((queue_name.into(), error.into()));
    }
}
