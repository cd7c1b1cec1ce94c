//! # Queue Topology
//!
//! Every configuration owns five work queues and one failed queue. Work
//! queues dead-letter through the default exchange into the failed queue, so
//! the failed queue must exist first.
//!
//! Structural changes go through one mutex: the broker channel is not safe
//! for concurrent declare/purge/delete.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::constants::{queues, QueueType};
use crate::error::{MigratorError, MigratorResult};
use crate::logging::log_queue_operation;
use crate::messaging::service::MessagingService;
use crate::messaging::types::{QueueHealthReport, QueueOptions};
use crate::remote::Datastore;

/// `<configId>-<kind>-queue`
pub fn queue_name(config_id: &str, queue_type: QueueType) -> String {
    format!("{config_id}-{}-{}", queue_type.as_str(), queues::QUEUE_SUFFIX)
}

pub fn legacy_download_queue(config_id: &str) -> String {
    format!("{}{config_id}", queues::LEGACY_DOWNLOAD_PREFIX)
}

pub fn legacy_upload_queue(config_id: &str) -> String {
    format!("{}{config_id}", queues::LEGACY_UPLOAD_PREFIX)
}

pub fn legacy_dead_letter_queue(queue: &str) -> String {
    format!("{}{queue}", queues::LEGACY_DLQ_PREFIX)
}

/// Queue names derived from a configuration id; recomputed on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSet {
    pub config_id: String,
    pub metadata_download: String,
    pub metadata_upload: String,
    pub data_download: String,
    pub data_upload: String,
    pub data_deletion: String,
    pub failed: String,
}

impl QueueSet {
    pub fn for_config(config_id: &str) -> Self {
        Self {
            config_id: config_id.to_string(),
            metadata_download: queue_name(config_id, QueueType::MetadataDownload),
            metadata_upload: queue_name(config_id, QueueType::MetadataUpload),
            data_download: queue_name(config_id, QueueType::DataDownload),
            data_upload: queue_name(config_id, QueueType::DataUpload),
            data_deletion: queue_name(config_id, QueueType::DataDeletion),
            failed: queue_name(config_id, QueueType::Failed),
        }
    }

    pub fn get(&self, queue_type: QueueType) -> &str {
        match queue_type {
            QueueType::MetadataDownload => &self.metadata_download,
            QueueType::MetadataUpload => &self.metadata_upload,
            QueueType::DataDownload => &self.data_download,
            QueueType::DataUpload => &self.data_upload,
            QueueType::DataDeletion => &self.data_deletion,
            QueueType::Failed => &self.failed,
        }
    }

    /// Work queues in declaration order
    pub fn work_queues(&self) -> Vec<(QueueType, &str)> {
        QueueType::WORK_QUEUES
            .iter()
            .map(|queue_type| (*queue_type, self.get(*queue_type)))
            .collect()
    }

    /// Failed queue first, then the work queues
    pub fn all(&self) -> Vec<&str> {
        std::iter::once(self.failed.as_str())
            .chain(self.work_queues().into_iter().map(|(_, name)| name))
            .collect()
    }
}

/// Shorthand for [`QueueSet::for_config`]
pub fn queue_names(config_id: &str) -> QueueSet {
    QueueSet::for_config(config_id)
}

/// Topology changes the consumer side must react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    QueuesCreated { config_id: String },
    QueuesDeleted { config_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QueueOpOutcome {
    Purged { messages: u32 },
    Deleted,
    Failed { error: String },
}

impl QueueOpOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, QueueOpOutcome::Failed { .. })
    }
}

/// Per-queue results of a best-effort batch operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueBatchReport {
    pub results: BTreeMap<String, QueueOpOutcome>,
}

impl QueueBatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| !r.is_failed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.values().filter(|r| r.is_failed()).count()
    }
}

/// Aggregate of initializing every stored configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitializationSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct TopologyManager {
    messaging: Arc<dyn MessagingService>,
    store: Datastore,
    config_namespace: String,
    mutation_lock: Mutex<()>,
    events: broadcast::Sender<TopologyEvent>,
}

impl TopologyManager {
    pub fn new(
        messaging: Arc<dyn MessagingService>,
        store: Datastore,
        config_namespace: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            messaging,
            store,
            config_namespace: config_namespace.into(),
            mutation_lock: Mutex::new(()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopologyEvent> {
        self.events.subscribe()
    }

    /// Assert the queue set without notifying consumers
    #[instrument(skip(self))]
    pub async fn ensure_queue_set(&self, config_id: &str) -> MigratorResult<QueueSet> {
        let set = QueueSet::for_config(config_id);
        let _guard = self.mutation_lock.lock().await;

        self.messaging
            .declare_queue(&set.failed, &QueueOptions::durable())
            .await?;
        let dead_letter = QueueOptions::dead_lettered_to(set.failed.clone());
        for (_, queue) in set.work_queues() {
            self.messaging.declare_queue(queue, &dead_letter).await?;
        }

        debug!(config_id = %config_id, "Queue set asserted");
        Ok(set)
    }

    /// Assert the queue set, then have consumers rediscover so it is served immediately
    pub async fn create_queues_for_config(&self, config_id: &str) -> MigratorResult<QueueSet> {
        let set = self.ensure_queue_set(config_id).await?;
        log_queue_operation("create", config_id, None, "created", None);
        let _ = self.events.send(TopologyEvent::QueuesCreated {
            config_id: config_id.to_string(),
        });
        Ok(set)
    }

    /// Purge every queue of a configuration; failures are recorded per queue
    #[instrument(skip(self))]
    pub async fn purge_config_queues(&self, config_id: &str) -> QueueBatchReport {
        let set = QueueSet::for_config(config_id);
        let _guard = self.mutation_lock.lock().await;
        let mut report = QueueBatchReport::default();

        for queue in set.all() {
            let outcome = match self.messaging.purge_queue(queue).await {
                Ok(messages) => QueueOpOutcome::Purged { messages },
                Err(e) => {
                    log_queue_operation("purge", config_id, Some(queue), "failed", Some(&e.to_string()));
                    QueueOpOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            report.results.insert(queue.to_string(), outcome);
        }

        info!(
            config_id = %config_id,
            purged = report.succeeded(),
            failed = report.failed(),
            "Purged configuration queues"
        );
        report
    }

    /// Delete every queue of a configuration; failures are recorded per queue
    #[instrument(skip(self))]
    pub async fn delete_config_queues(&self, config_id: &str) -> QueueBatchReport {
        let set = QueueSet::for_config(config_id);
        let report = {
            let _guard = self.mutation_lock.lock().await;
            let mut report = QueueBatchReport::default();
            // Work queues before the failed queue they dead-letter into
            for queue in set.all().into_iter().rev() {
                let outcome = match self.messaging.delete_queue(queue).await {
                    Ok(()) => QueueOpOutcome::Deleted,
                    Err(e) => {
                        log_queue_operation(
                            "delete",
                            config_id,
                            Some(queue),
                            "failed",
                            Some(&e.to_string()),
                        );
                        QueueOpOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                };
                report.results.insert(queue.to_string(), outcome);
            }
            report
        };

        let _ = self.events.send(TopologyEvent::QueuesDeleted {
            config_id: config_id.to_string(),
        });
        info!(
            config_id = %config_id,
            deleted = report.succeeded(),
            failed = report.failed(),
            "Deleted configuration queues"
        );
        report
    }

    /// Create the queue set of a configuration that must exist in the store
    pub async fn initialize_queues_from_datastore(&self, config_id: &str) -> MigratorResult<QueueSet> {
        if !self.store.exists(&self.config_namespace, config_id).await? {
            return Err(MigratorError::config_not_found(config_id));
        }
        self.create_queues_for_config(config_id).await
    }

    /// Initialize every stored configuration; one failure never blocks the others
    pub async fn initialize_all_queues_from_datastore(&self) -> MigratorResult<InitializationSummary> {
        let config_ids = self.known_config_ids().await?;
        let outcomes = join_all(config_ids.iter().map(|config_id| async move {
            (
                config_id.clone(),
                self.initialize_queues_from_datastore(config_id).await,
            )
        }))
        .await;

        let mut summary = InitializationSummary {
            total: outcomes.len(),
            ..Default::default()
        };
        for (config_id, outcome) in outcomes {
            match outcome {
                Ok(_) => summary.succeeded += 1,
                Err(e) => {
                    warn!(config_id = %config_id, error = %e, "Failed to initialize queues");
                    summary.failed += 1;
                    summary.failures.push((config_id, e.to_string()));
                }
            }
        }

        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Initialized queues from datastore"
        );
        Ok(summary)
    }

    /// Every configuration id in the store
    pub async fn known_config_ids(&self) -> MigratorResult<Vec<String>> {
        Ok(self.store.list_keys(&self.config_namespace).await?)
    }

    /// Report which of a configuration's queues exist
    pub async fn verify_config_queues(&self, config_id: &str) -> MigratorResult<QueueHealthReport> {
        let set = QueueSet::for_config(config_id);
        let names: Vec<String> = set.all().into_iter().map(str::to_string).collect();
        Ok(self.messaging.verify_queues(&names).await?)
    }

    /// Assert `download_<id>` / `upload_<id>` and their `dlq_` dead-letter queues
    pub async fn assert_legacy_queues(&self, config_id: &str) -> MigratorResult<(String, String)> {
        let download = legacy_download_queue(config_id);
        let upload = legacy_upload_queue(config_id);
        let _guard = self.mutation_lock.lock().await;

        for queue in [&download, &upload] {
            let dead_letter = legacy_dead_letter_queue(queue);
            self.messaging
                .declare_queue(&dead_letter, &QueueOptions::durable())
                .await?;
            self.messaging
                .declare_queue(queue, &QueueOptions::dead_lettered_to(dead_letter))
                .await?;
        }
        Ok((download, upload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_names_follow_convention() {
        let set = queue_names("abc");
        assert_eq!(set.metadata_download, "abc-metadata-download-queue");
        assert_eq!(set.data_deletion, "abc-data-deletion-queue");
        assert_eq!(set.failed, "abc-failed-queue");
        assert_eq!(set.all().len(), 6);
        assert_eq!(set.all()[0], "abc-failed-queue");
    }

    #[test]
    fn test_legacy_names() {
        assert_eq!(legacy_download_queue("abc"), "download_abc");
        assert_eq!(legacy_upload_queue("abc"), "upload_abc");
        assert_eq!(legacy_dead_letter_queue("download_abc"), "dlq_download_abc");
    }

    #[test]
    fn test_batch_report_counts() {
        let mut report = QueueBatchReport::default();
        report
            .results
            .insert("a".into(), QueueOpOutcome::Purged { messages: 2 });
        report.results.insert(
            "b".into(),
            QueueOpOutcome::Failed {
                error: "missing".into(),
            },
        );
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
    }
}
