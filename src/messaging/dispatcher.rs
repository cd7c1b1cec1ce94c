//! # Consumer Dispatcher
//!
//! Polls every work queue of every known configuration and hands each
//! message to a [`JobHandler`].
//!
//! ## Per-message state machine
//!
//! `Received -> Handling -> {Acked | Retrying -> Republished & Acked | DeadLettered}`
//!
//! - Success: ack.
//! - Retryable failure with `x-retry-count < max_retries`: republish the same
//!   body to the queue re-resolved from `configId` with the count incremented
//!   and diagnostics attached, then ack the original.
//! - Retries exhausted: nack without requeue; the broker dead-letters it
//!   into the failed queue.
//! - Non-retryable failure: publish a failed job to the failed queue, ack.
//! - No `configId` or unparsable body: nack without requeue.
//!
//! ## Backpressure
//!
//! One semaphore sized to the prefetch bound is shared by every queue's
//! polling task, so in-flight handling never exceeds it across the channel.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::message::{envelope_config_id, FailedJob, FailureInfo, Job, JobErrorInfo, RetryContext};
use super::publisher::Publisher;
use super::service::MessagingService;
use super::topology::{queue_name, TopologyEvent, TopologyManager};
use super::types::Delivery;
use crate::constants::{retry, QueueType};
use crate::error::{MigratorError, MigratorResult};
use crate::logging::{log_error, log_job_operation};

/// Executes one decoded job
#[async_trait]
pub trait JobHandler: Send + Sync + fmt::Debug {
    async fn handle(&self, job: Job, retry: &RetryContext) -> MigratorResult<()>;
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub prefetch: u16,
    pub poll_interval: Duration,
    pub max_retries: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            prefetch: crate::constants::limits::DISPATCHER_PREFETCH,
            poll_interval: Duration::from_millis(500),
            max_retries: retry::MAX_RETRIES,
        }
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    Retried { retry_count: u32, queue: String },
    DeadLettered { reason: String },
    SentToFailedQueue,
    /// Republish failed; the original was requeued
    Requeued,
}

#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub retried: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub sent_to_failed_queue: AtomicU64,
    pub polling_cycles: AtomicU64,
}

impl DispatcherStats {
    pub fn get_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn get_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn get_retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn get_dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    pub fn get_sent_to_failed_queue(&self) -> u64 {
        self.sent_to_failed_queue.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct ConsumerSet {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    queues: Vec<String>,
}

pub struct ConsumerDispatcher {
    messaging: Arc<dyn MessagingService>,
    publisher: Publisher,
    topology: Arc<TopologyManager>,
    handler: Arc<dyn JobHandler>,
    config: DispatcherConfig,
    semaphore: Arc<Semaphore>,
    stats: Arc<DispatcherStats>,
    ready: AtomicBool,
    consumers: Mutex<ConsumerSet>,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ConsumerDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerDispatcher")
            .field("provider", &self.messaging.provider_name())
            .field("config", &self.config)
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .finish()
    }
}

impl ConsumerDispatcher {
    pub fn new(
        messaging: Arc<dyn MessagingService>,
        topology: Arc<TopologyManager>,
        handler: Arc<dyn JobHandler>,
        config: DispatcherConfig,
    ) -> Self {
        let permits = usize::from(config.prefetch.max(1));
        Self {
            publisher: Publisher::new(Arc::clone(&messaging)),
            messaging,
            topology,
            handler,
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
            stats: Arc::new(DispatcherStats::default()),
            ready: AtomicBool::new(false),
            consumers: Mutex::new(ConsumerSet::default()),
            listener: parking_lot::Mutex::new(None),
        }
    }

    pub fn stats(&self) -> Arc<DispatcherStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Queues currently consumed
    pub async fn consumed_queues(&self) -> Vec<String> {
        self.consumers.lock().await.queues.clone()
    }

    /// Set prefetch, discover queues, attach consumers and follow topology changes
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> MigratorResult<()> {
        self.messaging.set_prefetch(self.config.prefetch).await?;
        self.spawn_consumers().await?;
        self.start_listener();
        Ok(())
    }

    /// Stop consumers, rediscover and attach again
    pub async fn restart(self: &Arc<Self>) -> MigratorResult<()> {
        info!("🔄 Restarting consumer dispatcher");
        self.stop_consumers().await;
        self.spawn_consumers().await
    }

    /// Stop everything; in-flight handlers run to completion
    pub async fn stop(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        self.stop_consumers().await;
        info!("Consumer dispatcher stopped");
    }

    fn start_listener(self: &Arc<Self>) {
        let mut slot = self.listener.lock();
        if slot.is_some() {
            return;
        }
        let mut events = self.topology.subscribe();
        let dispatcher = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        debug!(?event, "Topology changed");
                        if let Err(e) = dispatcher.restart().await {
                            error!(error = %e, "Dispatcher restart failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Missed topology events, restarting once");
                        if let Err(e) = dispatcher.restart().await {
                            error!(error = %e, "Dispatcher restart failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Assert the queue set of every known config and list its work queues
    pub async fn discover(&self) -> MigratorResult<Vec<(QueueType, String)>> {
        let config_ids = self.topology.known_config_ids().await?;
        let mut queues = Vec::new();
        for config_id in config_ids {
            match self.topology.ensure_queue_set(&config_id).await {
                Ok(set) => queues.extend(
                    set.work_queues()
                        .into_iter()
                        .map(|(queue_type, name)| (queue_type, name.to_string())),
                ),
                Err(e) => warn!(config_id = %config_id, error = %e, "Skipping configuration"),
            }
        }
        Ok(queues)
    }

    async fn spawn_consumers(self: &Arc<Self>) -> MigratorResult<()> {
        let queues = self.discover().await?;
        let mut consumers = self.consumers.lock().await;
        let running = Arc::new(AtomicBool::new(true));

        let mut handles = Vec::with_capacity(queues.len());
        for (queue_type, queue) in &queues {
            let dispatcher = Arc::clone(self);
            let running = Arc::clone(&running);
            let queue_type = *queue_type;
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                dispatcher.polling_loop(queue_type, queue, running).await;
            }));
        }

        *consumers = ConsumerSet {
            running,
            handles,
            queues: queues.into_iter().map(|(_, q)| q).collect(),
        };
        self.ready.store(true, Ordering::SeqCst);
        info!(
            queues = consumers.queues.len(),
            prefetch = self.config.prefetch,
            "✅ Consumer dispatcher ready"
        );
        Ok(())
    }

    async fn stop_consumers(&self) {
        let handles = {
            let mut consumers = self.consumers.lock().await;
            consumers.running.store(false, Ordering::SeqCst);
            consumers.queues.clear();
            std::mem::take(&mut consumers.handles)
        };
        self.ready.store(false, Ordering::SeqCst);
        join_all(handles).await;
    }

    async fn polling_loop(self: Arc<Self>, queue_type: QueueType, queue: String, running: Arc<AtomicBool>) {
        debug!(queue = %queue, queue_type = %queue_type, "Consumer attached");
        while running.load(Ordering::SeqCst) {
            self.stats.polling_cycles.fetch_add(1, Ordering::Relaxed);

            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let delivery = match self.messaging.receive_messages(&queue, 1).await {
                Ok(mut deliveries) => deliveries.pop(),
                Err(e) => {
                    warn!(queue = %queue, error = %e, "Receive failed");
                    None
                }
            };

            match delivery {
                Some(delivery) => {
                    let dispatcher = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = dispatcher.handle_delivery(queue_type, delivery).await {
                            error!(error = %e, "Failed to settle delivery");
                        }
                        drop(permit);
                    });
                }
                None => {
                    drop(permit);
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
        debug!(queue = %queue, "Consumer detached");
    }

    /// Receive and settle at most one message from `queue`
    pub async fn poll_once(
        &self,
        queue_type: QueueType,
        queue: &str,
    ) -> MigratorResult<Option<DeliveryOutcome>> {
        let Some(delivery) = self.messaging.receive_messages(queue, 1).await?.pop() else {
            return Ok(None);
        };
        self.handle_delivery(queue_type, delivery).await.map(Some)
    }

    /// Run the handler for one delivery and settle it
    #[instrument(skip(self, delivery), fields(queue = %delivery.queue))]
    pub async fn handle_delivery(
        &self,
        queue_type: QueueType,
        delivery: Delivery,
    ) -> MigratorResult<DeliveryOutcome> {
        let body: Value = match serde_json::from_slice(&delivery.payload) {
            Ok(body) => body,
            Err(e) => {
                return self
                    .dead_letter(&delivery, format!("unparsable body: {e}"))
                    .await;
            }
        };

        let Some(config_id) = envelope_config_id(&body).map(str::to_string) else {
            return self
                .dead_letter(&delivery, "message has no configId".to_string())
                .await;
        };

        let retry = RetryContext::from_headers(&delivery.headers);
        let result = match Job::decode(queue_type, &body) {
            Ok(job) => self.handler.handle(job, &retry).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.messaging
                    .ack_message(&delivery.queue, &delivery.receipt_handle)
                    .await?;
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                debug!(config_id = %config_id, queue_type = %queue_type, "Job completed");
                Ok(DeliveryOutcome::Acked)
            }
            Err(err) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.handle_failure(queue_type, &config_id, body, delivery, retry, err)
                    .await
            }
        }
    }

    async fn handle_failure(
        &self,
        queue_type: QueueType,
        config_id: &str,
        body: Value,
        delivery: Delivery,
        retry: RetryContext,
        err: MigratorError,
    ) -> MigratorResult<DeliveryOutcome> {
        let failure = FailureInfo::from_error(&err, queue_type);
        warn!(
            config_id = %config_id,
            queue_type = %queue_type,
            retry_count = retry.count,
            reason = %failure.reason,
            error = %err,
            "Job failed"
        );

        if !err.is_retryable() {
            let failed = FailedJob {
                operation: queue_type.as_str().to_string(),
                config_id: config_id.to_string(),
                error: Some(JobErrorInfo::from(&err)),
                job: Some(body),
            };
            let published = match serde_json::to_value(&failed) {
                Ok(value) => {
                    self.publisher
                        .push_to_queue(config_id, QueueType::Failed, value, Some(&err))
                        .await
                }
                Err(e) => Err(e.into()),
            };
            return match published {
                Ok(()) => {
                    self.messaging
                        .ack_message(&delivery.queue, &delivery.receipt_handle)
                        .await?;
                    self.stats
                        .sent_to_failed_queue
                        .fetch_add(1, Ordering::Relaxed);
                    Ok(DeliveryOutcome::SentToFailedQueue)
                }
                Err(e) => {
                    warn!(config_id = %config_id, error = %e, "Failed-queue publish failed");
                    self.dead_letter(&delivery, err.to_string()).await
                }
            };
        }

        if retry.count >= self.config.max_retries {
            return self.dead_letter(&delivery, err.to_string()).await;
        }

        // Topology may have been redeployed since the message was published
        let target = queue_name(config_id, queue_type);
        let next = retry.next(failure);
        match self
            .publisher
            .publish_value(&target, &body, &next.to_headers())
            .await
        {
            Ok(()) => {
                self.messaging
                    .ack_message(&delivery.queue, &delivery.receipt_handle)
                    .await?;
                self.stats.retried.fetch_add(1, Ordering::Relaxed);
                log_job_operation(
                    "retry",
                    config_id,
                    queue_type.as_str(),
                    Some(next.count),
                    "republished",
                    Some(&target),
                );
                Ok(DeliveryOutcome::Retried {
                    retry_count: next.count,
                    queue: target,
                })
            }
            Err(e) => {
                log_error("dispatcher", "retry_publish", &e.to_string(), Some(&target));
                self.messaging
                    .nack_message(&delivery.queue, &delivery.receipt_handle, true)
                    .await?;
                Ok(DeliveryOutcome::Requeued)
            }
        }
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: String,
    ) -> MigratorResult<DeliveryOutcome> {
        warn!(queue = %delivery.queue, reason = %reason, "Dead-lettering message");
        self.messaging
            .nack_message(&delivery.queue, &delivery.receipt_handle, false)
            .await?;
        self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
        Ok(DeliveryOutcome::DeadLettered { reason })
    }
}
