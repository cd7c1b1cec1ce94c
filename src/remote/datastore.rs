use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::client::RemoteApi;
use super::error::RemoteResult;
use crate::error::MigratorResult;

/// Key-value namespaces hosted by an analytics-platform instance
///
/// Used for migration configurations, mapping tables, summaries and the
/// portal configuration moved by export/import.
#[derive(Debug, Clone)]
pub struct Datastore {
    api: Arc<dyn RemoteApi>,
}

fn key_path(namespace: &str, key: &str) -> String {
    format!("api/dataStore/{namespace}/{key}")
}

impl Datastore {
    pub fn new(api: Arc<dyn RemoteApi>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &Arc<dyn RemoteApi> {
        &self.api
    }

    /// `Ok(None)` when the key is not yet present
    pub async fn get(&self, namespace: &str, key: &str) -> RemoteResult<Option<Value>> {
        self.api.get_json(&key_path(namespace, key), &[], None).await
    }

    pub async fn get_as<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> MigratorResult<Option<T>> {
        match self.get(namespace, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, namespace: &str, key: &str) -> RemoteResult<bool> {
        Ok(self.get(namespace, key).await?.is_some())
    }

    pub async fn create(&self, namespace: &str, key: &str, value: &Value) -> RemoteResult<()> {
        self.api
            .post_json(&key_path(namespace, key), &[], value)
            .await
            .map(|_| ())
    }

    pub async fn update(&self, namespace: &str, key: &str, value: &Value) -> RemoteResult<()> {
        self.api
            .put_json(&key_path(namespace, key), value)
            .await
            .map(|_| ())
    }

    /// Create-or-replace
    pub async fn put(&self, namespace: &str, key: &str, value: &Value) -> RemoteResult<()> {
        match self.update(namespace, key, value).await {
            Err(e) if e.is_not_found() => {
                debug!(namespace = %namespace, key = %key, "Key absent, creating");
                self.create(namespace, key, value).await
            }
            other => other,
        }
    }

    pub async fn put_as<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> MigratorResult<()> {
        let value = serde_json::to_value(value)?;
        Ok(self.put(namespace, key, &value).await?)
    }

    /// Keys in a namespace; an unknown namespace has none
    pub async fn list_keys(&self, namespace: &str) -> RemoteResult<Vec<String>> {
        let value = self
            .api
            .get_json(&format!("api/dataStore/{namespace}"), &[], None)
            .await?;
        Ok(value
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|key| key.as_str().map(str::to_string))
            .collect())
    }
}
