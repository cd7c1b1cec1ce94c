//! # Job Messages
//!
//! Typed job payloads, the JSON envelope stamped onto them, and the retry
//! context carried in message headers.
//!
//! Envelope: `{ ...jobFields, configId, queueType, timestamp }`. Headers carry
//! `x-retry-count` and, after a failure, the `x-error-*` diagnostics.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::{headers, QueueType};
use crate::error::{MigratorError, MigratorResult};
use crate::messaging::types::{HeaderValue, MessageHeaders};
use crate::models::{ConfigurationExport, DimensionSet, ItemConfig, MigrationConfig, RuntimeConfig};

/// Download one `(period, item)` slice of analytics data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDownloadJob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub main_config_id: String,
    pub main_config: MigrationConfig,
    pub period_id: String,
    pub item_config: ItemConfig,
    pub runtime_config: RuntimeConfig,
    /// Set on pagination children; suppresses further partitioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_dimensions: Option<DimensionSet>,
}

impl DataDownloadJob {
    /// Pagination child restricted to `partition`
    pub fn child(&self, partition: DimensionSet) -> Self {
        Self {
            job_id: Some(Uuid::new_v4()),
            override_dimensions: Some(partition),
            ..self.clone()
        }
    }

    /// Identity that survives redelivery of the same message body
    pub fn attempt_key(&self) -> String {
        let mut key = match self.job_id {
            Some(id) => id.to_string(),
            None => format!(
                "{}/{}/{}",
                self.main_config_id, self.period_id, self.item_config.id
            ),
        };
        if let Some(overrides) = &self.override_dimensions {
            for (name, values) in overrides.dimensions() {
                key.push_str(&format!("/{name}={}", values.join(",")));
            }
        }
        key
    }
}

/// Upload one stored payload to the destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUploadJob {
    pub main_config_id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_id: Option<String>,
}

/// Remove previously migrated values described by a stored payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDeletionJob {
    pub main_config_id: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataDownloadJob {
    pub config_id: String,
}

/// What a metadata-upload job carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetadataPayload {
    /// A metadata bundle, validated on the upload side
    Metadata(Value),
    Configuration(ConfigurationExport),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUploadJob {
    pub config_id: String,
    #[serde(flatten)]
    pub payload: MetadataPayload,
}

/// `{message, stack, name}` attached to failed-queue messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobErrorInfo {
    pub message: String,
    pub stack: String,
    pub name: String,
}

impl From<&MigratorError> for JobErrorInfo {
    fn from(err: &MigratorError) -> Self {
        Self {
            message: err.to_string(),
            stack: err.chain(),
            name: err.error_name().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedJob {
    /// Queue type of the job that failed
    pub operation: String,
    pub config_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobErrorInfo>,
    /// Original job body, kept for manual replay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<Value>,
}

/// Every job kind the engine drives
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    MetadataDownload(MetadataDownloadJob),
    MetadataUpload(MetadataUploadJob),
    DataDownload(DataDownloadJob),
    DataUpload(DataUploadJob),
    DataDeletion(DataDeletionJob),
    Failed(FailedJob),
}

fn decode_as<T: DeserializeOwned>(queue_type: QueueType, body: &Value) -> MigratorResult<T> {
    serde_json::from_value(body.clone())
        .map_err(|e| MigratorError::malformed(format!("{queue_type} job: {e}")))
}

impl Job {
    /// Decode a job body received from a queue of `queue_type`
    pub fn decode(queue_type: QueueType, body: &Value) -> MigratorResult<Job> {
        Ok(match queue_type {
            QueueType::MetadataDownload => Job::MetadataDownload(decode_as(queue_type, body)?),
            QueueType::MetadataUpload => Job::MetadataUpload(decode_as(queue_type, body)?),
            QueueType::DataDownload => Job::DataDownload(decode_as(queue_type, body)?),
            QueueType::DataUpload => Job::DataUpload(decode_as(queue_type, body)?),
            QueueType::DataDeletion => Job::DataDeletion(decode_as(queue_type, body)?),
            QueueType::Failed => Job::Failed(decode_as(queue_type, body)?),
        })
    }

    pub fn queue_type(&self) -> QueueType {
        match self {
            Job::MetadataDownload(_) => QueueType::MetadataDownload,
            Job::MetadataUpload(_) => QueueType::MetadataUpload,
            Job::DataDownload(_) => QueueType::DataDownload,
            Job::DataUpload(_) => QueueType::DataUpload,
            Job::DataDeletion(_) => QueueType::DataDeletion,
            Job::Failed(_) => QueueType::Failed,
        }
    }

    pub fn config_id(&self) -> &str {
        match self {
            Job::MetadataDownload(job) => &job.config_id,
            Job::MetadataUpload(job) => &job.config_id,
            Job::DataDownload(job) => &job.main_config_id,
            Job::DataUpload(job) => &job.main_config_id,
            Job::DataDeletion(job) => &job.main_config_id,
            Job::Failed(job) => &job.config_id,
        }
    }

    pub fn to_value(&self) -> MigratorResult<Value> {
        Ok(match self {
            Job::MetadataDownload(job) => serde_json::to_value(job)?,
            Job::MetadataUpload(job) => serde_json::to_value(job)?,
            Job::DataDownload(job) => serde_json::to_value(job)?,
            Job::DataUpload(job) => serde_json::to_value(job)?,
            Job::DataDeletion(job) => serde_json::to_value(job)?,
            Job::Failed(job) => serde_json::to_value(job)?,
        })
    }
}

/// Stamp `{configId, queueType, timestamp}` (and `error` for the failed queue) onto a job body
pub fn stamp_envelope(
    job: Value,
    config_id: &str,
    queue_type: QueueType,
    error: Option<&JobErrorInfo>,
    timestamp: DateTime<Utc>,
) -> MigratorResult<Value> {
    let Value::Object(mut fields) = job else {
        return Err(MigratorError::malformed("job payload must be a JSON object"));
    };
    fields.insert("configId".into(), Value::String(config_id.to_string()));
    fields.insert("queueType".into(), Value::String(queue_type.as_str().to_string()));
    fields.insert("timestamp".into(), Value::String(timestamp.to_rfc3339()));
    if let (QueueType::Failed, Some(error)) = (queue_type, error) {
        fields.insert("error".into(), serde_json::to_value(error)?);
    }
    Ok(Value::Object(fields))
}

/// `configId` of an envelope, when present and non-empty
pub fn envelope_config_id(body: &Value) -> Option<&str> {
    body.get("configId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Diagnostics written to headers when a handler fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureInfo {
    pub reason: String,
    pub message: String,
    pub stack: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub queue_type: QueueType,
    pub http_status: Option<u16>,
    pub http_code: Option<String>,
    pub http_url: Option<String>,
}

impl FailureInfo {
    pub fn from_error(err: &MigratorError, queue_type: QueueType) -> Self {
        let remote = err.remote();
        Self {
            reason: err.failure_reason().to_string(),
            message: err.to_string(),
            stack: err.chain(),
            name: err.error_name().to_string(),
            timestamp: Utc::now(),
            queue_type,
            http_status: remote.and_then(|r| r.status()),
            http_code: remote.and_then(|r| r.code()).map(str::to_string),
            http_url: remote.and_then(|r| r.url()).map(str::to_string),
        }
    }

    fn write_headers(&self, out: &mut MessageHeaders) {
        out.insert(headers::FAILURE_REASON.into(), self.reason.clone().into());
        out.insert(headers::ERROR_MESSAGE.into(), self.message.clone().into());
        out.insert(headers::ERROR_STACK.into(), self.stack.clone().into());
        out.insert(headers::ERROR_NAME.into(), self.name.clone().into());
        out.insert(
            headers::ERROR_TIMESTAMP.into(),
            self.timestamp.to_rfc3339().into(),
        );
        out.insert(headers::QUEUE_TYPE.into(), self.queue_type.as_str().into());
        if let Some(status) = self.http_status {
            out.insert(headers::HTTP_STATUS.into(), HeaderValue::Int(i64::from(status)));
        }
        if let Some(code) = &self.http_code {
            out.insert(headers::HTTP_CODE.into(), code.clone().into());
        }
        if let Some(url) = &self.http_url {
            out.insert(headers::HTTP_URL.into(), url.clone().into());
        }
    }

    fn read_headers(input: &MessageHeaders) -> Option<Self> {
        let text = |name: &str| input.get(name).map(HeaderValue::as_text);
        let queue_type = text(headers::QUEUE_TYPE)?.parse().ok()?;
        Some(Self {
            reason: text(headers::FAILURE_REASON).unwrap_or_default(),
            message: text(headers::ERROR_MESSAGE).unwrap_or_default(),
            stack: text(headers::ERROR_STACK).unwrap_or_default(),
            name: text(headers::ERROR_NAME).unwrap_or_default(),
            timestamp: text(headers::ERROR_TIMESTAMP)
                .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
                .map(|ts| ts.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
            queue_type,
            http_status: input
                .get(headers::HTTP_STATUS)
                .and_then(HeaderValue::as_i64)
                .and_then(|s| u16::try_from(s).ok()),
            http_code: text(headers::HTTP_CODE),
            http_url: text(headers::HTTP_URL),
        })
    }
}

/// Retry state carried in message headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryContext {
    pub count: u32,
    pub last_error: Option<FailureInfo>,
}

impl RetryContext {
    /// Read from received headers; a missing or unparsable count is 0
    pub fn from_headers(input: &MessageHeaders) -> Self {
        let count = input
            .get(headers::RETRY_COUNT)
            .and_then(HeaderValue::as_i64)
            .and_then(|c| u32::try_from(c).ok())
            .unwrap_or(0);
        Self {
            count,
            last_error: FailureInfo::read_headers(input),
        }
    }

    /// Context for the next attempt after `failure`
    pub fn next(&self, failure: FailureInfo) -> Self {
        Self {
            count: self.count + 1,
            last_error: Some(failure),
        }
    }

    pub fn to_headers(&self) -> MessageHeaders {
        let mut out = MessageHeaders::new();
        out.insert(headers::RETRY_COUNT.into(), HeaderValue::from(self.count));
        if let Some(failure) = &self.last_error {
            failure.write_headers(&mut out);
        }
        out
    }
}
