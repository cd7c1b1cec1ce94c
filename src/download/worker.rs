//! # Data Worker
//!
//! Dedicated consumers for the legacy `download_<configId>` and
//! `upload_<configId>` queues, on their own broker connection.
//!
//! The download and upload lanes are independent: each has its own
//! in-flight bound and its own attempt bookkeeping. A failed job is
//! requeued with a negative acknowledgement up to `max_job_retries` times,
//! then rejected without requeue so the broker moves it to `dlq_<queue>`.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::executor::{DownloadExecutor, JobRoute, UploadExecutor};
use crate::error::{MigratorError, MigratorResult};
use crate::logging::log_job_operation;
use crate::messaging::topology::{legacy_download_queue, legacy_upload_queue};
use crate::messaging::{DataDownloadJob, DataUploadJob, Delivery, MessagingService};
use crate::system::MigrationContext;

#[derive(Debug, Clone)]
pub struct DataWorkerConfig {
    pub prefetch: u16,
    pub poll_interval: Duration,
    pub max_job_retries: u32,
}

impl Default for DataWorkerConfig {
    fn default() -> Self {
        Self {
            prefetch: crate::constants::limits::WORKER_PREFETCH,
            poll_interval: Duration::from_millis(500),
            max_job_retries: crate::constants::retry::DATA_JOB_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataLane {
    Download,
    Upload,
}

impl DataLane {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataLane::Download => "download",
            DataLane::Upload => "upload",
        }
    }

    /// Configuration id behind one of this lane's queue names
    pub fn config_id<'a>(&self, queue: &'a str) -> &'a str {
        let prefix = match self {
            DataLane::Download => "download_",
            DataLane::Upload => "upload_",
        };
        queue.strip_prefix(prefix).unwrap_or(queue)
    }

    pub fn queue_for(&self, config_id: &str) -> String {
        match self {
            DataLane::Download => legacy_download_queue(config_id),
            DataLane::Upload => legacy_upload_queue(config_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Acked,
    Requeued { attempt: u32 },
    Discarded { reason: String },
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub requeued: AtomicU64,
    pub discarded: AtomicU64,
}

impl WorkerStats {
    pub fn get_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn get_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn get_requeued(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }

    pub fn get_discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct LaneState {
    semaphore: Arc<Semaphore>,
    attempts: DashMap<String, u32>,
    stats: Arc<WorkerStats>,
}

impl LaneState {
    fn new(prefetch: u16) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(usize::from(prefetch.max(1)))),
            attempts: DashMap::new(),
            stats: Arc::new(WorkerStats::default()),
        }
    }
}

#[derive(Debug, Default)]
struct ConsumerSet {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

pub struct DataWorker {
    context: Arc<MigrationContext>,
    messaging: Arc<dyn MessagingService>,
    download: DownloadExecutor,
    upload: UploadExecutor,
    config: DataWorkerConfig,
    download_lane: LaneState,
    upload_lane: LaneState,
    consumers: Mutex<ConsumerSet>,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for DataWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataWorker")
            .field("provider", &self.messaging.provider_name())
            .field("config", &self.config)
            .finish()
    }
}

impl DataWorker {
    /// `messaging` should be a connection of its own, separate from the dispatcher's
    pub fn new(
        context: Arc<MigrationContext>,
        messaging: Arc<dyn MessagingService>,
        config: DataWorkerConfig,
    ) -> Self {
        Self {
            download: DownloadExecutor::new(Arc::clone(&context)),
            upload: UploadExecutor::new(Arc::clone(&context)),
            download_lane: LaneState::new(config.prefetch),
            upload_lane: LaneState::new(config.prefetch),
            context,
            messaging,
            config,
            consumers: Mutex::new(ConsumerSet::default()),
            listener: parking_lot::Mutex::new(None),
        }
    }

    fn lane(&self, lane: DataLane) -> &LaneState {
        match lane {
            DataLane::Download => &self.download_lane,
            DataLane::Upload => &self.upload_lane,
        }
    }

    pub fn stats(&self, lane: DataLane) -> Arc<WorkerStats> {
        Arc::clone(&self.lane(lane).stats)
    }

    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> MigratorResult<()> {
        self.messaging.set_prefetch(self.config.prefetch).await?;
        self.spawn_consumers().await?;

        let mut slot = self.listener.lock();
        if slot.is_none() {
            let mut events = self.context.topology().subscribe();
            let worker = Arc::clone(self);
            *slot = Some(tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            if let Err(e) = worker.restart().await {
                                error!(error = %e, "Data worker restart failed");
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }
        Ok(())
    }

    pub async fn restart(self: &Arc<Self>) -> MigratorResult<()> {
        self.stop_consumers().await;
        self.spawn_consumers().await
    }

    pub async fn stop(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        self.stop_consumers().await;
        info!("Data worker stopped");
    }

    /// Assert the legacy queues of every known configuration
    pub async fn discover(&self) -> MigratorResult<Vec<String>> {
        let topology = self.context.topology();
        let mut config_ids = Vec::new();
        for config_id in topology.known_config_ids().await? {
            match topology.assert_legacy_queues(&config_id).await {
                Ok(_) => config_ids.push(config_id),
                Err(e) => warn!(config_id = %config_id, error = %e, "Skipping legacy queues"),
            }
        }
        Ok(config_ids)
    }

    async fn spawn_consumers(self: &Arc<Self>) -> MigratorResult<()> {
        let config_ids = self.discover().await?;
        let mut consumers = self.consumers.lock().await;
        let running = Arc::new(AtomicBool::new(true));

        let mut handles = Vec::new();
        for config_id in &config_ids {
            for lane in [DataLane::Download, DataLane::Upload] {
                let worker = Arc::clone(self);
                let running = Arc::clone(&running);
                let queue = lane.queue_for(config_id);
                handles.push(tokio::spawn(async move {
                    worker.polling_loop(lane, queue, running).await;
                }));
            }
        }

        *consumers = ConsumerSet { running, handles };
        info!(
            configs = config_ids.len(),
            prefetch = self.config.prefetch,
            "✅ Data worker consuming legacy queues"
        );
        Ok(())
    }

    async fn stop_consumers(&self) {
        let handles = {
            let mut consumers = self.consumers.lock().await;
            consumers.running.store(false, Ordering::SeqCst);
            std::mem::take(&mut consumers.handles)
        };
        join_all(handles).await;
    }

    async fn polling_loop(self: Arc<Self>, lane: DataLane, queue: String, running: Arc<AtomicBool>) {
        while running.load(Ordering::SeqCst) {
            let semaphore = Arc::clone(&self.lane(lane).semaphore);
            let Ok(permit) = semaphore.acquire_owned().await else {
                break;
            };

            // Receive errors during a reconnect are expected; keep polling
            let delivery = match self.messaging.receive_messages(&queue, 1).await {
                Ok(mut deliveries) => deliveries.pop(),
                Err(e) => {
                    debug!(queue = %queue, error = %e, "Receive failed");
                    None
                }
            };

            match delivery {
                Some(delivery) => {
                    let worker = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = worker.handle_delivery(lane, delivery).await {
                            error!(error = %e, "Failed to settle data job");
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
    }

    /// Receive and settle at most one job from `queue`
    pub async fn process_once(&self, lane: DataLane, queue: &str) -> MigratorResult<Option<WorkerOutcome>> {
        let Some(delivery) = self.messaging.receive_messages(queue, 1).await?.pop() else {
            return Ok(None);
        };
        self.handle_delivery(lane, delivery).await.map(Some)
    }

    pub async fn handle_delivery(&self, lane: DataLane, delivery: Delivery) -> MigratorResult<WorkerOutcome> {
        let (key, result) = match lane {
            DataLane::Download => match serde_json::from_slice::<DataDownloadJob>(&delivery.payload) {
                Ok(job) => (
                    job.attempt_key(),
                    self.download.execute(&job, JobRoute::Legacy).await.map(|_| ()),
                ),
                Err(e) => return self.discard(lane, &delivery, format!("malformed download job: {e}")).await,
            },
            DataLane::Upload => match serde_json::from_slice::<DataUploadJob>(&delivery.payload) {
                Ok(job) => (job.filename.clone(), self.upload.upload(&job).await.map(|_| ())),
                Err(e) => return self.discard(lane, &delivery, format!("malformed upload job: {e}")).await,
            },
        };
        self.settle(lane, key, &delivery, result).await
    }

    async fn settle(
        &self,
        lane: DataLane,
        key: String,
        delivery: &Delivery,
        result: MigratorResult<()>,
    ) -> MigratorResult<WorkerOutcome> {
        let state = self.lane(lane);
        let err = match result {
            Ok(()) => {
                state.attempts.remove(&key);
                self.messaging
                    .ack_message(&delivery.queue, &delivery.receipt_handle)
                    .await?;
                state.stats.processed.fetch_add(1, Ordering::Relaxed);
                return Ok(WorkerOutcome::Acked);
            }
            Err(err) => err,
        };
        state.stats.failed.fetch_add(1, Ordering::Relaxed);

        if !err.is_retryable() {
            state.attempts.remove(&key);
            return self.discard(lane, delivery, err.to_string()).await;
        }

        let attempt = {
            let mut entry = state.attempts.entry(key.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        if attempt <= self.config.max_job_retries {
            log_job_operation(
                "requeue",
                lane.config_id(&delivery.queue),
                lane.as_str(),
                Some(attempt),
                "requeued",
                Some(&err.to_string()),
            );
            self.messaging
                .nack_message(&delivery.queue, &delivery.receipt_handle, true)
                .await?;
            state.stats.requeued.fetch_add(1, Ordering::Relaxed);
            return Ok(WorkerOutcome::Requeued { attempt });
        }

        state.attempts.remove(&key);
        self.discard(lane, delivery, exhausted(&err)).await
    }

    async fn discard(
        &self,
        lane: DataLane,
        delivery: &Delivery,
        reason: String,
    ) -> MigratorResult<WorkerOutcome> {
        log_job_operation(
            "discard",
            lane.config_id(&delivery.queue),
            lane.as_str(),
            None,
            "discarded",
            Some(&reason),
        );
        self.messaging
            .nack_message(&delivery.queue, &delivery.receipt_handle, false)
            .await?;
        self.lane(lane).stats.discarded.fetch_add(1, Ordering::Relaxed);
        Ok(WorkerOutcome::Discarded { reason })
    }
}

fn exhausted(err: &MigratorError) -> String {
    format!("retries exhausted: {err}")
}
