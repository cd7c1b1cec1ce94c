//! # Remote Call Errors
//!
//! Failures of HTTP calls against the source, destination and store
//! instances. A 404 on a read path is not an error: reads return `Ok(None)`.

use serde_json::Value;
use thiserror::Error;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP {status} from {url}")]
    Status {
        status: u16,
        url: String,
        /// Parsed response body; non-JSON bodies are kept as a string value
        body: Option<Value>,
    },

    #[error("Request to {url} failed: {message}")]
    Transport {
        url: String,
        code: Option<String>,
        message: String,
    },

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Invalid response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RemoteError {
    pub fn status_error(status: u16, url: impl Into<String>, body: Option<Value>) -> Self {
        Self::Status {
            status,
            url: url.into(),
            body,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short transport code, axios style
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Status { status, .. } if *status >= 500 => Some("ERR_BAD_RESPONSE"),
            Self::Status { .. } => Some("ERR_BAD_REQUEST"),
            Self::Transport { code, .. } => code.as_deref(),
            Self::Timeout { .. } => Some("ECONNABORTED"),
            Self::Decode { .. } | Self::InvalidRequest(_) => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Status { url, .. }
            | Self::Transport { url, .. }
            | Self::Timeout { url, .. }
            | Self::Decode { url, .. } => Some(url),
            Self::InvalidRequest(_) => None,
        }
    }

    pub fn body(&self) -> Option<&Value> {
        match self {
            Self::Status { body, .. } => body.as_ref(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Network failures, timeouts, throttling and 5xx may succeed on retry
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Decode { .. } | Self::InvalidRequest(_) => false,
        }
    }

    pub(crate) fn from_reqwest(url: &str, timeout_ms: u64, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout {
                url: url.to_string(),
                timeout_ms,
            };
        }
        let code = if error.is_connect() {
            Some("ECONNREFUSED")
        } else if error.is_body() || error.is_decode() {
            Some("ERR_BAD_RESPONSE")
        } else if error.is_request() {
            Some("ERR_NETWORK")
        } else {
            None
        };
        Self::Transport {
            url: url.to_string(),
            code: code.map(str::to_string),
            message: error.to_string(),
        }
    }
}
