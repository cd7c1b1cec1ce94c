//! # Publisher
//!
//! Serializes jobs into the envelope and publishes them persistently to the
//! queue derived from their configuration id.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::message::{
    stamp_envelope, DataDownloadJob, DataUploadJob, Job, JobErrorInfo, RetryContext,
};
use super::service::MessagingService;
use super::topology::{legacy_download_queue, legacy_upload_queue, queue_name};
use crate::constants::QueueType;
use crate::error::{MigratorError, MigratorResult};
use crate::messaging::types::MessageHeaders;

#[derive(Debug, Clone)]
pub struct Publisher {
    messaging: Arc<dyn MessagingService>,
}

impl Publisher {
    pub fn new(messaging: Arc<dyn MessagingService>) -> Self {
        Self { messaging }
    }

    pub fn messaging(&self) -> &Arc<dyn MessagingService> {
        &self.messaging
    }

    /// Stamp and publish `job_data` to the `queue_type` queue of `config_id`
    ///
    /// `error` is attached only for the failed queue.
    pub async fn push_to_queue(
        &self,
        config_id: &str,
        queue_type: QueueType,
        job_data: Value,
        error: Option<&MigratorError>,
    ) -> MigratorResult<()> {
        let error_info = error.map(JobErrorInfo::from);
        let body = stamp_envelope(job_data, config_id, queue_type, error_info.as_ref(), Utc::now())?;
        let queue = queue_name(config_id, queue_type);
        self.publish_value(&queue, &body, &RetryContext::default().to_headers())
            .await?;
        debug!(config_id = %config_id, queue = %queue, queue_type = %queue_type, "Job published");
        Ok(())
    }

    /// Publish a typed job to its own queue
    pub async fn push_job(&self, job: &Job) -> MigratorResult<()> {
        self.push_to_queue(job.config_id(), job.queue_type(), job.to_value()?, None)
            .await
    }

    pub async fn push_to_download_queue(
        &self,
        config_id: &str,
        job: &DataDownloadJob,
    ) -> MigratorResult<()> {
        let body = stamp_envelope(
            serde_json::to_value(job)?,
            config_id,
            QueueType::DataDownload,
            None,
            Utc::now(),
        )?;
        self.publish_value(&legacy_download_queue(config_id), &body, &MessageHeaders::new())
            .await
    }

    pub async fn push_to_upload_queue(
        &self,
        config_id: &str,
        job: &DataUploadJob,
    ) -> MigratorResult<()> {
        let body = stamp_envelope(
            serde_json::to_value(job)?,
            config_id,
            QueueType::DataUpload,
            None,
            Utc::now(),
        )?;
        self.publish_value(&legacy_upload_queue(config_id), &body, &MessageHeaders::new())
            .await
    }

    /// Publish an already-enveloped body as-is
    pub async fn publish_value(
        &self,
        queue: &str,
        body: &Value,
        headers: &MessageHeaders,
    ) -> MigratorResult<()> {
        let bytes = serde_json::to_vec(body)?;
        self.messaging.publish(queue, &bytes, headers).await?;
        Ok(())
    }
}
