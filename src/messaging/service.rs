//! # Messaging Service Trait
//!
//! Provider-agnostic broker operations. Implemented by the RabbitMQ provider
//! for production and the in-memory provider for tests and local runs.

use async_trait::async_trait;

use super::errors::MessagingError;
use super::types::{Delivery, MessageHeaders, QueueHealthReport, QueueOptions, ReceiptHandle};

/// Core messaging operations
///
/// Object safe: components hold an `Arc<dyn MessagingService>`.
#[async_trait]
pub trait MessagingService: Send + Sync + std::fmt::Debug + 'static {
    /// Declare a queue (idempotent when options are unchanged)
    async fn declare_queue(&self, queue_name: &str, options: &QueueOptions)
        -> Result<(), MessagingError>;

    /// Drop every ready message; returns how many were removed
    async fn purge_queue(&self, queue_name: &str) -> Result<u32, MessagingError>;

    async fn delete_queue(&self, queue_name: &str) -> Result<(), MessagingError>;

    /// Check which of `queue_names` exist
    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError>;

    /// Publish a persistent message to a queue through the default exchange
    async fn publish(
        &self,
        queue_name: &str,
        payload: &[u8],
        headers: &MessageHeaders,
    ) -> Result<(), MessagingError>;

    /// Pull up to `max_messages` without auto-ack
    async fn receive_messages(
        &self,
        queue_name: &str,
        max_messages: usize,
    ) -> Result<Vec<Delivery>, MessagingError>;

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError>;

    /// Negative-acknowledge; without requeue the queue's dead-letter target receives it
    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError>;

    /// Bound unacknowledged deliveries across the channel
    async fn set_prefetch(&self, prefetch: u16) -> Result<(), MessagingError>;

    async fn health_check(&self) -> Result<bool, MessagingError>;

    fn provider_name(&self) -> &'static str;
}
