//! # Analytics Platform HTTP Client
//!
//! [`RemoteApi`] is the seam every pipeline talks through; [`HttpRemoteClient`]
//! is the reqwest implementation. Reads map 404 to `Ok(None)` so callers can
//! tell "does not exist yet" apart from a real failure.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::{RemoteError, RemoteResult};
use crate::models::ConnectionConfig;

/// Query string pairs; keys may repeat (`dimension=...&dimension=...`)
pub type QueryParams = [(String, String)];

#[async_trait]
pub trait RemoteApi: Send + Sync + fmt::Debug {
    fn base_url(&self) -> &str;

    /// GET a JSON resource; `Ok(None)` when it does not exist
    async fn get_json(
        &self,
        path: &str,
        query: &QueryParams,
        timeout: Option<Duration>,
    ) -> RemoteResult<Option<Value>>;

    async fn post_json(&self, path: &str, query: &QueryParams, body: &Value)
        -> RemoteResult<Value>;

    async fn put_json(&self, path: &str, body: &Value) -> RemoteResult<Value>;

    async fn delete(&self, path: &str) -> RemoteResult<()>;
}

/// reqwest-backed [`RemoteApi`]
#[derive(Clone)]
pub struct HttpRemoteClient {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    default_timeout: Duration,
}

impl fmt::Debug for HttpRemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRemoteClient")
            .field("base_url", &self.base_url)
            .field("basic_auth", &self.username.is_some())
            .field("timeout_ms", &self.default_timeout.as_millis())
            .finish()
    }
}

impl HttpRemoteClient {
    /// Build a client for one instance; a token takes precedence over basic credentials
    pub fn new(connection: &ConnectionConfig, default_timeout: Duration) -> RemoteResult<Self> {
        let base_url = connection.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(RemoteError::InvalidRequest(format!(
                "base URL must be http(s): {base_url}"
            )));
        }

        let mut builder = Client::builder()
            .timeout(default_timeout)
            .user_agent(format!("analytics-migrator/{}", env!("CARGO_PKG_VERSION")));

        if let Some(token) = &connection.token {
            let mut default_headers = reqwest::header::HeaderMap::new();
            default_headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("ApiToken {token}").parse().map_err(|e| {
                    RemoteError::InvalidRequest(format!("Invalid access token: {e}"))
                })?,
            );
            builder = builder.default_headers(default_headers);
            debug!(base_url = %base_url, "Configured token authentication");
        }

        let client = builder
            .build()
            .map_err(|e| RemoteError::InvalidRequest(format!("Failed to create HTTP client: {e}")))?;

        let (username, password) = match &connection.token {
            Some(_) => (None, None),
            None => (connection.username.clone(), connection.password.clone()),
        };

        Ok(Self {
            client,
            base_url,
            username,
            password,
            default_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_deref()),
            None => request,
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        url: &str,
        timeout: Duration,
    ) -> RemoteResult<Response> {
        let timeout_ms = timeout.as_millis() as u64;
        self.authorize(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(url, timeout_ms, e))
    }

    async fn into_json(url: &str, response: Response) -> RemoteResult<Value> {
        let status = response.status();
        let text = response.text().await.map_err(|e| RemoteError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            let body = parse_body(&text);
            warn!(status = %status, url = %url, "Remote call failed");
            return Err(RemoteError::status_error(status.as_u16(), url, body));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| RemoteError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

fn parse_body(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

#[async_trait]
impl RemoteApi for HttpRemoteClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(
        &self,
        path: &str,
        query: &QueryParams,
        timeout: Option<Duration>,
    ) -> RemoteResult<Option<Value>> {
        let url = self.url(path);
        debug!(url = %url, params = query.len(), "GET");
        let response = self
            .send(
                self.client.get(&url).query(query),
                &url,
                timeout.unwrap_or(self.default_timeout),
            )
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(url = %url, "Resource not found");
            return Ok(None);
        }
        Self::into_json(&url, response).await.map(Some)
    }

    async fn post_json(
        &self,
        path: &str,
        query: &QueryParams,
        body: &Value,
    ) -> RemoteResult<Value> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        let response = self
            .send(
                self.client.post(&url).query(query).json(body),
                &url,
                self.default_timeout,
            )
            .await?;
        Self::into_json(&url, response).await
    }

    async fn put_json(&self, path: &str, body: &Value) -> RemoteResult<Value> {
        let url = self.url(path);
        debug!(url = %url, "PUT");
        let response = self
            .send(self.client.put(&url).json(body), &url, self.default_timeout)
            .await?;
        Self::into_json(&url, response).await
    }

    async fn delete(&self, path: &str) -> RemoteResult<()> {
        let url = self.url(path);
        debug!(url = %url, "DELETE");
        let response = self
            .send(self.client.delete(&url), &url, self.default_timeout)
            .await?;
        Self::into_json(&url, response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_base_url() {
        let result = HttpRemoteClient::new(
            &ConnectionConfig::new("ftp://example.org"),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(RemoteError::InvalidRequest(_))));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = HttpRemoteClient::new(
            &ConnectionConfig::new("https://example.org/hmis/"),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            client.url("/api/dataStore/ns/key"),
            "https://example.org/hmis/api/dataStore/ns/key"
        );
    }

    #[test]
    fn test_token_disables_basic_auth() {
        let mut connection = ConnectionConfig::new("https://example.org");
        connection.username = Some("admin".into());
        connection.password = Some("district".into());
        connection.token = Some("d2p_abc".into());
        let client = HttpRemoteClient::new(&connection, Duration::from_secs(1)).unwrap();
        assert!(client.username.is_none());
        assert!(!format!("{client:?}").contains("district"));
    }

    #[test]
    fn test_parse_body_keeps_plain_text() {
        assert_eq!(parse_body("oops"), Some(Value::String("oops".into())));
        assert_eq!(parse_body("  "), None);
        assert_eq!(
            parse_body(r#"{"status":"ERROR"}"#),
            Some(serde_json::json!({"status": "ERROR"}))
        );
    }
}
