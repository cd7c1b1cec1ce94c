use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Which half of the data pipeline produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    Download,
    Upload,
}

impl ProcessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessType::Download => "download",
            ProcessType::Upload => "upload",
        }
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Success,
    Failed,
    NoData,
}

/// Append-only outcome entry scoped to `(configId, type)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummaryRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub process_type: ProcessType,
    pub status: ProcessStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_summary: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Response body of the remote call that failed, when there was one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProcessSummaryRecord {
    fn new(process_type: ProcessType, status: ProcessStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            process_type,
            status,
            count: None,
            import_summary: None,
            error: None,
            remote_error: None,
            period: None,
            timestamp: Utc::now(),
        }
    }

    pub fn downloaded(count: usize) -> Self {
        Self {
            count: Some(count),
            ..Self::new(ProcessType::Download, ProcessStatus::Success)
        }
    }

    pub fn no_data() -> Self {
        Self {
            count: Some(0),
            ..Self::new(ProcessType::Download, ProcessStatus::NoData)
        }
    }

    pub fn uploaded(import_summary: Value) -> Self {
        Self {
            import_summary: Some(import_summary),
            ..Self::new(ProcessType::Upload, ProcessStatus::Success)
        }
    }

    pub fn failed(
        process_type: ProcessType,
        error: impl Into<String>,
        remote_error: Option<Value>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            remote_error,
            ..Self::new(process_type, ProcessStatus::Failed)
        }
    }

    pub fn for_period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_record_wire_shape() {
        let record = ProcessSummaryRecord::failed(
            ProcessType::Download,
            "timeout",
            Some(serde_json::json!({"httpStatusCode": 500})),
        )
        .for_period("202401");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "download");
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["remoteError"]["httpStatusCode"], 500);
        assert_eq!(json["period"], "202401");
        assert!(json.get("count").is_none());
    }

    #[test]
    fn test_no_data_status() {
        let json = serde_json::to_value(ProcessSummaryRecord::no_data()).unwrap();
        assert_eq!(json["status"], "NO_DATA");
        assert_eq!(json["count"], 0);
    }
}
