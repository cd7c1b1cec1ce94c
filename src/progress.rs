//! # Progress Tracking
//!
//! Append-only process summaries and percentage-complete updates, scoped to
//! `(configId, type)`. The download, upload and metadata pipelines report
//! through [`ProgressTracker`]; tracker failures are logged by callers and
//! never fail a job.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

use crate::error::{MigratorError, MigratorResult};
use crate::models::{ProcessSummaryRecord, ProcessType};
use crate::remote::Datastore;

/// `current / total` steps of a multi-step operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

impl Progress {
    pub fn new(current: usize, total: usize) -> Self {
        Self { current, total }
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.current as f64 / self.total as f64) * 100.0
    }
}

/// Stored shape of one `(configId, type)` summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryDocument {
    pub records: Vec<ProcessSummaryRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

#[async_trait]
pub trait ProgressTracker: Send + Sync + fmt::Debug {
    /// Append one outcome record
    async fn record(&self, config_id: &str, record: ProcessSummaryRecord) -> MigratorResult<()>;

    async fn update_progress(
        &self,
        config_id: &str,
        process_type: ProcessType,
        progress: Progress,
    ) -> MigratorResult<()>;
}

/// FAILED record carrying the remote error body when the failure came from a remote call
pub fn failure_record(process_type: ProcessType, err: &MigratorError) -> ProcessSummaryRecord {
    ProcessSummaryRecord::failed(
        process_type,
        err.to_string(),
        err.remote().and_then(|r| r.body()).cloned(),
    )
}

/// Record through `tracker`, logging instead of failing
pub async fn record_quietly(
    tracker: &dyn ProgressTracker,
    config_id: &str,
    record: ProcessSummaryRecord,
) {
    if let Err(e) = tracker.record(config_id, record).await {
        warn!(config_id = %config_id, error = %e, "Failed to record process summary");
    }
}

pub async fn update_progress_quietly(
    tracker: &dyn ProgressTracker,
    config_id: &str,
    process_type: ProcessType,
    progress: Progress,
) {
    if let Err(e) = tracker.update_progress(config_id, process_type, progress).await {
        warn!(config_id = %config_id, error = %e, "Failed to update progress");
    }
}

/// Keeps summaries in process memory
#[derive(Debug, Default)]
pub struct InMemoryProgressTracker {
    documents: Mutex<HashMap<(String, ProcessType), SummaryDocument>>,
    history: Mutex<HashMap<(String, ProcessType), Vec<Progress>>>,
}

impl InMemoryProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, config_id: &str, process_type: ProcessType) -> Vec<ProcessSummaryRecord> {
        self.documents
            .lock()
            .get(&(config_id.to_string(), process_type))
            .map(|doc| doc.records.clone())
            .unwrap_or_default()
    }

    /// Every progress update in the order received
    pub fn progress_updates(&self, config_id: &str, process_type: ProcessType) -> Vec<Progress> {
        self.history
            .lock()
            .get(&(config_id.to_string(), process_type))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProgressTracker for InMemoryProgressTracker {
    async fn record(&self, config_id: &str, record: ProcessSummaryRecord) -> MigratorResult<()> {
        self.documents
            .lock()
            .entry((config_id.to_string(), record.process_type))
            .or_default()
            .records
            .push(record);
        Ok(())
    }

    async fn update_progress(
        &self,
        config_id: &str,
        process_type: ProcessType,
        progress: Progress,
    ) -> MigratorResult<()> {
        let key = (config_id.to_string(), process_type);
        self.documents.lock().entry(key.clone()).or_default().progress = Some(progress);
        self.history.lock().entry(key).or_default().push(progress);
        Ok(())
    }
}

/// Persists summaries in the external store under `<configId>-<type>-summary`
#[derive(Debug)]
pub struct DatastoreProgressTracker {
    store: Datastore,
    namespace: String,
    // Read-modify-write of one document must not interleave
    write_lock: tokio::sync::Mutex<()>,
}

impl DatastoreProgressTracker {
    pub fn new(store: Datastore, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn summary_key(config_id: &str, process_type: ProcessType) -> String {
        format!("{config_id}-{}-summary", process_type.as_str())
    }

    pub async fn load(
        &self,
        config_id: &str,
        process_type: ProcessType,
    ) -> MigratorResult<SummaryDocument> {
        let key = Self::summary_key(config_id, process_type);
        Ok(self
            .store
            .get_as::<SummaryDocument>(&self.namespace, &key)
            .await?
            .unwrap_or_default())
    }

    async fn modify(
        &self,
        config_id: &str,
        process_type: ProcessType,
        apply: impl FnOnce(&mut SummaryDocument) + Send,
    ) -> MigratorResult<()> {
        let _guard = self.write_lock.lock().await;
        let key = Self::summary_key(config_id, process_type);
        let mut document = self.load(config_id, process_type).await?;
        apply(&mut document);
        self.store.put_as(&self.namespace, &key, &document).await?;
        debug!(key = %key, records = document.records.len(), "Summary written");
        Ok(())
    }
}

#[async_trait]
impl ProgressTracker for DatastoreProgressTracker {
    async fn record(&self, config_id: &str, record: ProcessSummaryRecord) -> MigratorResult<()> {
        let process_type = record.process_type;
        self.modify(config_id, process_type, move |doc| doc.records.push(record))
            .await
    }

    async fn update_progress(
        &self,
        config_id: &str,
        process_type: ProcessType,
        progress: Progress,
    ) -> MigratorResult<()> {
        self.modify(config_id, process_type, move |doc| {
            doc.progress = Some(progress)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(Progress::new(1, 4).percent(), 25.0);
        assert_eq!(Progress::new(0, 0).percent(), 100.0);
    }

    #[tokio::test]
    async fn test_in_memory_records_are_scoped_by_type() {
        let tracker = InMemoryProgressTracker::new();
        tracker
            .record("cfg", ProcessSummaryRecord::downloaded(3))
            .await
            .unwrap();
        tracker
            .record("cfg", ProcessSummaryRecord::no_data())
            .await
            .unwrap();
        tracker
            .record("cfg", ProcessSummaryRecord::uploaded(serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(tracker.records("cfg", ProcessType::Download).len(), 2);
        assert_eq!(tracker.records("cfg", ProcessType::Upload).len(), 1);
        assert!(tracker.records("other", ProcessType::Upload).is_empty());
    }

    #[tokio::test]
    async fn test_datastore_summaries_are_append_only() {
        let api = crate::test_helpers::FakeRemoteApi::new("https://store");
        let tracker = DatastoreProgressTracker::new(Datastore::new(api.clone()), "summaries");

        tracker
            .record("cfg", ProcessSummaryRecord::downloaded(3))
            .await
            .unwrap();
        tracker
            .record("cfg", ProcessSummaryRecord::no_data().for_period("202402"))
            .await
            .unwrap();
        tracker
            .update_progress("cfg", ProcessType::Download, Progress::new(2, 5))
            .await
            .unwrap();
        tracker
            .record("cfg", ProcessSummaryRecord::uploaded(serde_json::json!({})))
            .await
            .unwrap();

        let document = tracker.load("cfg", ProcessType::Download).await.unwrap();
        assert_eq!(document.records.len(), 2);
        assert_eq!(document.records[0].count, Some(3));
        assert_eq!(document.records[1].period.as_deref(), Some("202402"));
        assert_eq!(document.progress, Some(Progress::new(2, 5)));

        let stored = api.stored_value("summaries", "cfg-download-summary").unwrap();
        assert_eq!(stored["records"].as_array().map(Vec::len), Some(2));
        assert_eq!(stored["progress"]["current"], 2);
        assert_eq!(
            tracker.load("cfg", ProcessType::Upload).await.unwrap().records.len(),
            1
        );
    }

    #[test]
    fn test_failure_record_keeps_remote_body() {
        let err = MigratorError::from(crate::remote::RemoteError::status_error(
            409,
            "https://destination/api/metadata",
            Some(serde_json::json!({"status": "ERROR"})),
        ));
        let record = failure_record(ProcessType::Upload, &err);
        assert_eq!(record.status, crate::models::ProcessStatus::Failed);
        assert_eq!(record.remote_error, Some(serde_json::json!({"status": "ERROR"})));
    }

    #[test]
    fn test_summary_key() {
        assert_eq!(
            DatastoreProgressTracker::summary_key("cfg", ProcessType::Upload),
            "cfg-upload-summary"
        );
    }
}
