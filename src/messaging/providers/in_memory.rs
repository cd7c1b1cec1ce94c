//! # In-Memory Messaging Service
//!
//! Thread-safe in-memory broker for tests and local runs.
//!
//! ## Features
//!
//! - **Dead-lettering**: `nack(requeue = false)` routes to the queue named by
//!   the dead-letter routing key, like RabbitMQ's default exchange
//! - **Unacked tracking**: received messages stay pending until ack or nack
//! - **Thread-Safe**: uses `tokio::sync::RwLock` for concurrent access
//!
//! ## Example
//!
//! ```rust
//! use migrator_core::messaging::{
//!     InMemoryMessagingService, MessageHeaders, MessagingService, QueueOptions,
//! };
//!
//! # tokio_test::block_on(async {
//! let broker = InMemoryMessagingService::new();
//! broker.declare_queue("failed", &QueueOptions::durable()).await?;
//! broker
//!     .declare_queue("work", &QueueOptions::dead_lettered_to("failed"))
//!     .await?;
//! broker.publish("work", b"{}", &MessageHeaders::new()).await?;
//!
//! let delivery = broker.receive_messages("work", 1).await?.remove(0);
//! broker.nack_message("work", &delivery.receipt_handle, false).await?;
//! assert_eq!(broker.queue_length("failed").await, 1);
//! # Ok::<(), migrator_core::messaging::MessagingError>(())
//! # }).unwrap();
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::messaging::errors::MessagingError;
use crate::messaging::service::MessagingService;
use crate::messaging::types::{
    Delivery, HeaderValue, MessageHeaders, QueueHealthReport, QueueOptions, ReceiptHandle,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    headers: MessageHeaders,
    redelivered: bool,
}

#[derive(Debug)]
struct InMemoryQueue {
    options: QueueOptions,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, StoredMessage>,
    total_published: u64,
    total_acked: u64,
    total_nacked: u64,
}

impl InMemoryQueue {
    fn new(options: QueueOptions) -> Self {
        Self {
            options,
            ready: VecDeque::new(),
            unacked: HashMap::new(),
            total_published: 0,
            total_acked: 0,
            total_nacked: 0,
        }
    }
}

/// Snapshot of one queue for assertions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryQueueStats {
    pub ready: usize,
    pub unacked: usize,
    pub total_published: u64,
    pub total_acked: u64,
    pub total_nacked: u64,
}

/// A message sitting in a queue, as seen by tests
#[derive(Debug, Clone)]
pub struct PeekedMessage {
    pub payload: serde_json::Value,
    pub headers: MessageHeaders,
}

/// In-memory [`MessagingService`]
///
/// # Example
///
/// ```rust
/// use migrator_core::messaging::providers::InMemoryMessagingService;
/// use migrator_core::messaging::{MessageHeaders, MessagingService, QueueOptions};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = InMemoryMessagingService::new();
/// service.declare_queue("jobs", &QueueOptions::durable()).await?;
/// service.publish("jobs", br#"{"configId":"abc"}"#, &MessageHeaders::new()).await?;
/// let deliveries = service.receive_messages("jobs", 10).await?;
/// assert_eq!(deliveries.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct InMemoryMessagingService {
    queues: RwLock<HashMap<String, InMemoryQueue>>,
    next_tag: AtomicU64,
    prefetch: AtomicU16,
}

impl Default for InMemoryMessagingService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessagingService {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            next_tag: AtomicU64::new(1),
            prefetch: AtomicU16::new(0),
        }
    }

    /// Ready (not yet received) messages in a queue
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues.get(queue_name).map(|q| q.ready.len()).unwrap_or(0)
    }

    pub async fn has_queue(&self, queue_name: &str) -> bool {
        self.queues.read().await.contains_key(queue_name)
    }

    /// Sorted names of every declared queue
    pub async fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn queue_options(&self, queue_name: &str) -> Option<QueueOptions> {
        let queues = self.queues.read().await;
        queues.get(queue_name).map(|q| q.options.clone())
    }

    pub async fn queue_stats(&self, queue_name: &str) -> Option<InMemoryQueueStats> {
        let queues = self.queues.read().await;
        queues.get(queue_name).map(|q| InMemoryQueueStats {
            ready: q.ready.len(),
            unacked: q.unacked.len(),
            total_published: q.total_published,
            total_acked: q.total_acked,
            total_nacked: q.total_nacked,
        })
    }

    /// Ready messages decoded as JSON, front first; non-JSON payloads are skipped
    pub async fn peek_messages(&self, queue_name: &str) -> Vec<PeekedMessage> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| {
                q.ready
                    .iter()
                    .filter_map(|m| {
                        serde_json::from_slice(&m.payload)
                            .ok()
                            .map(|payload| PeekedMessage {
                                payload,
                                headers: m.headers.clone(),
                            })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn prefetch(&self) -> u16 {
        self.prefetch.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn declare_queue(
        &self,
        queue_name: &str,
        options: &QueueOptions,
    ) -> Result<(), MessagingError> {
        let mut queues = self.queues.write().await;
        match queues.get(queue_name) {
            Some(existing) if &existing.options != options => {
                Err(MessagingError::queue_creation(
                    queue_name,
                    "PRECONDITION_FAILED - inequivalent queue arguments",
                ))
            }
            Some(_) => Ok(()),
            None => {
                queues.insert(queue_name.to_string(), InMemoryQueue::new(options.clone()));
                Ok(())
            }
        }
    }

    async fn purge_queue(&self, queue_name: &str) -> Result<u32, MessagingError> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let purged = queue.ready.len() as u32;
        queue.ready.clear();
        Ok(purged)
    }

    async fn delete_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        let mut queues = self.queues.write().await;
        queues
            .remove(queue_name)
            .map(|_| ())
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))
    }

    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError> {
        let queues = self.queues.read().await;
        let mut report = QueueHealthReport::new();
        for name in queue_names {
            if queues.contains_key(name) {
                report.add_healthy(name);
            } else {
                report.add_missing(name);
            }
        }
        Ok(report)
    }

    async fn publish(
        &self,
        queue_name: &str,
        payload: &[u8],
        headers: &MessageHeaders,
    ) -> Result<(), MessagingError> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        queue.total_published += 1;
        queue.ready.push_back(StoredMessage {
            payload: payload.to_vec(),
            headers: headers.clone(),
            redelivered: false,
        });
        Ok(())
    }

    async fn receive_messages(
        &self,
        queue_name: &str,
        max_messages: usize,
    ) -> Result<Vec<Delivery>, MessagingError> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let mut deliveries = Vec::new();
        while deliveries.len() < max_messages {
            let Some(message) = queue.ready.pop_front() else {
                break;
            };
            let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
            deliveries.push(Delivery {
                queue: queue_name.to_string(),
                receipt_handle: ReceiptHandle::from(tag),
                payload: message.payload.clone(),
                headers: message.headers.clone(),
                redelivered: message.redelivered,
            });
            queue.unacked.insert(tag, message);
        }
        Ok(deliveries)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let tag = receipt_handle
            .as_u64()
            .ok_or_else(|| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        queue
            .unacked
            .remove(&tag)
            .ok_or_else(|| MessagingError::ack(queue_name, tag, "unknown delivery tag"))?;
        queue.total_acked += 1;
        Ok(())
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let tag = receipt_handle
            .as_u64()
            .ok_or_else(|| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let mut message = queue
            .unacked
            .remove(&tag)
            .ok_or_else(|| MessagingError::nack(queue_name, tag, "unknown delivery tag"))?;
        queue.total_nacked += 1;

        if requeue {
            message.redelivered = true;
            queue.ready.push_front(message);
            return Ok(());
        }

        // Unroutable dead letters are dropped, as the broker does
        let Some(target) = queue.options.dead_letter_routing_key.clone() else {
            return Ok(());
        };
        message
            .headers
            .insert("x-first-death-queue".to_string(), HeaderValue::from(queue_name));
        message.redelivered = false;
        if let Some(dead_letter_queue) = queues.get_mut(&target) {
            dead_letter_queue.total_published += 1;
            dead_letter_queue.ready.push_back(message);
        }
        Ok(())
    }

    async fn set_prefetch(&self, prefetch: u16) -> Result<(), MessagingError> {
        self.prefetch.store(prefetch, Ordering::Relaxed);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_receive_ack() {
        let service = InMemoryMessagingService::new();
        service
            .declare_queue("jobs", &QueueOptions::durable())
            .await
            .unwrap();
        service
            .publish("jobs", br#"{"n":1}"#, &MessageHeaders::new())
            .await
            .unwrap();

        let deliveries = service.receive_messages("jobs", 5).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(service.queue_stats("jobs").await.unwrap().unacked, 1);

        service
            .ack_message("jobs", &deliveries[0].receipt_handle)
            .await
            .unwrap();
        let stats = service.queue_stats("jobs").await.unwrap();
        assert_eq!(stats.unacked, 0);
        assert_eq!(stats.total_acked, 1);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_dead_letters() {
        let service = InMemoryMessagingService::new();
        service
            .declare_queue("failed", &QueueOptions::durable())
            .await
            .unwrap();
        service
            .declare_queue("work", &QueueOptions::dead_lettered_to("failed"))
            .await
            .unwrap();
        service
            .publish("work", br#"{"n":1}"#, &MessageHeaders::new())
            .await
            .unwrap();

        let delivery = service.receive_messages("work", 1).await.unwrap().remove(0);
        service
            .nack_message("work", &delivery.receipt_handle, false)
            .await
            .unwrap();

        assert_eq!(service.queue_length("work").await, 0);
        let dead = service.peek_messages("failed").await;
        assert_eq!(dead.len(), 1);
        assert_eq!(
            dead[0].headers.get("x-first-death-queue"),
            Some(&HeaderValue::from("work"))
        );
    }

    #[tokio::test]
    async fn test_nack_with_requeue_marks_redelivered() {
        let service = InMemoryMessagingService::new();
        service
            .declare_queue("work", &QueueOptions::durable())
            .await
            .unwrap();
        service
            .publish("work", b"{}", &MessageHeaders::new())
            .await
            .unwrap();
        let first = service.receive_messages("work", 1).await.unwrap().remove(0);
        service
            .nack_message("work", &first.receipt_handle, true)
            .await
            .unwrap();
        let second = service.receive_messages("work", 1).await.unwrap().remove(0);
        assert!(second.redelivered);
    }

    #[tokio::test]
    async fn test_redeclare_with_other_arguments_fails() {
        let service = InMemoryMessagingService::new();
        service
            .declare_queue("q", &QueueOptions::durable())
            .await
            .unwrap();
        assert!(service
            .declare_queue("q", &QueueOptions::durable())
            .await
            .is_ok());
        assert!(service
            .declare_queue("q", &QueueOptions::dead_lettered_to("x"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_missing_queue_operations_fail() {
        let service = InMemoryMessagingService::new();
        assert!(matches!(
            service.purge_queue("nope").await,
            Err(MessagingError::QueueNotFound { .. })
        ));
        assert!(service.delete_queue("nope").await.is_err());
        assert!(service
            .publish("nope", b"{}", &MessageHeaders::new())
            .await
            .is_err());
    }
}
