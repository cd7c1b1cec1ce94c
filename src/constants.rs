//! # System Constants
//!
//! Operational boundaries of the migration engine: retry caps, wire header
//! names, queue naming fragments and fan-out limits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Retry policy shared by the consumer dispatcher and the data workers
pub mod retry {
    /// Handler failures tolerated by the dispatcher before a message is dead-lettered
    pub const MAX_RETRIES: u32 = 3;

    /// Requeue attempts tolerated by the dedicated data download/upload workers
    pub const DATA_JOB_MAX_RETRIES: u32 = 2;

    /// Initial broker connection attempts before giving up
    pub const CONNECT_MAX_RETRIES: u32 = 5;

    /// Delay between initial connection attempts
    pub const CONNECT_DELAY_MS: u64 = 5_000;

    /// Reconnect backoff grows by this step per attempt
    pub const RECONNECT_STEP_MS: u64 = 5_000;

    /// Reconnect backoff never exceeds this cap
    pub const RECONNECT_CAP_MS: u64 = 30_000;
}

/// Message header names (the broker interoperability surface)
pub mod headers {
    pub const RETRY_COUNT: &str = "x-retry-count";
    pub const FAILURE_REASON: &str = "x-failure-reason";
    pub const ERROR_MESSAGE: &str = "x-error-message";
    pub const ERROR_STACK: &str = "x-error-stack";
    pub const ERROR_NAME: &str = "x-error-name";
    pub const ERROR_TIMESTAMP: &str = "x-error-timestamp";
    pub const QUEUE_TYPE: &str = "x-queue-type";
    pub const HTTP_STATUS: &str = "x-axios-status";
    pub const HTTP_CODE: &str = "x-axios-code";
    pub const HTTP_URL: &str = "x-axios-url";

    /// Queue argument naming the dead-letter exchange
    pub const DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

    /// Queue argument naming the dead-letter routing key
    pub const DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
}

/// Queue naming fragments
pub mod queues {
    pub const QUEUE_SUFFIX: &str = "queue";
    pub const LEGACY_DOWNLOAD_PREFIX: &str = "download_";
    pub const LEGACY_UPLOAD_PREFIX: &str = "upload_";
    pub const LEGACY_DLQ_PREFIX: &str = "dlq_";
}

/// Fan-out and batching limits
pub mod limits {
    /// Concurrent child publishes when a download job is re-partitioned
    pub const PAGINATION_PUBLISH_CONCURRENCY: usize = 10;

    /// Concurrent batched metadata fetches
    pub const METADATA_FETCH_CONCURRENCY: usize = 5;

    /// Identifiers requested per metadata fetch
    pub const METADATA_IDS_PER_BATCH: usize = 50;

    /// Pause between metadata fetch batches
    pub const METADATA_BATCH_PAUSE_MS: u64 = 1_000;

    /// Category payloads above this item count are uploaded per type
    pub const CATEGORY_SPLIT_THRESHOLD: usize = 500;

    /// In-flight messages on the shared dispatcher channel
    pub const DISPATCHER_PREFETCH: u16 = 5;

    /// In-flight messages on a dedicated data worker channel
    pub const WORKER_PREFETCH: u16 = 20;

    /// Default analytics page size
    pub const DEFAULT_PAGE_SIZE: usize = 50;

    /// Default analytics request timeout
    pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;
}

/// Analytics dimension identifiers
pub mod dimensions {
    pub const DATA: &str = "dx";
    pub const PERIOD: &str = "pe";
    pub const ORG_UNIT: &str = "ou";
}

/// Record name the analytics platform gives to its built-in category structures
pub const DEFAULT_RECORD_NAME: &str = "default";

/// Kinds of work queue derived per configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueType {
    MetadataDownload,
    MetadataUpload,
    DataDownload,
    DataUpload,
    DataDeletion,
    Failed,
}

impl QueueType {
    /// The five work queues, in declaration order
    pub const WORK_QUEUES: [QueueType; 5] = [
        QueueType::MetadataDownload,
        QueueType::MetadataUpload,
        QueueType::DataDownload,
        QueueType::DataUpload,
        QueueType::DataDeletion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::MetadataDownload => "metadata-download",
            QueueType::MetadataUpload => "metadata-upload",
            QueueType::DataDownload => "data-download",
            QueueType::DataUpload => "data-upload",
            QueueType::DataDeletion => "data-deletion",
            QueueType::Failed => "failed",
        }
    }

    pub fn is_work_queue(&self) -> bool {
        !matches!(self, QueueType::Failed)
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metadata-download" => Ok(QueueType::MetadataDownload),
            "metadata-upload" => Ok(QueueType::MetadataUpload),
            "data-download" => Ok(QueueType::DataDownload),
            "data-upload" => Ok(QueueType::DataUpload),
            "data-deletion" => Ok(QueueType::DataDeletion),
            "failed" => Ok(QueueType::Failed),
            other => Err(format!("unknown queue type: {other}")),
        }
    }
}
