//! In-memory stand-in for an analytics-platform instance.
//!
//! Serves fixed resources, id-filtered collections and a key-value store
//! under `api/dataStore/`, records every call, and can be told to fail.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::models::ConnectionConfig;
use crate::remote::{QueryParams, RemoteApi, RemoteClientFactory, RemoteError, RemoteResult};

type Responder = Arc<dyn Fn(&QueryParams) -> RemoteResult<Option<Value>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// One observed request
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RecordedCall {
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct FakeState {
    resources: HashMap<String, Value>,
    collections: HashMap<String, (String, Vec<Value>)>,
    responders: HashMap<String, Responder>,
    post_responses: HashMap<String, Value>,
    failures: HashMap<String, VecDeque<RemoteError>>,
    store: BTreeMap<String, BTreeMap<String, Value>>,
    calls: Vec<RecordedCall>,
}

pub struct FakeRemoteApi {
    base_url: String,
    state: Mutex<FakeState>,
}

impl std::fmt::Debug for FakeRemoteApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeRemoteApi")
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn strip(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

/// Ids named by an `id:in:[a,b]` filter
fn filtered_ids(query: &QueryParams) -> Option<Vec<String>> {
    query.iter().find_map(|(key, value)| {
        if key != "filter" {
            return None;
        }
        let list = value.strip_prefix("id:in:[")?.strip_suffix(']')?;
        Some(list.split(',').map(str::to_string).collect())
    })
}

impl FakeRemoteApi {
    pub fn new(base_url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            base_url: base_url.into(),
            state: Mutex::new(FakeState::default()),
        })
    }

    /// Serve `value` for GET `path`, regardless of query
    pub fn set_resource(&self, path: &str, value: Value) {
        self.state.lock().resources.insert(strip(path), value);
    }

    /// Serve `records` under `key` at `path`, honouring `filter=id:in:[..]`
    pub fn set_collection(&self, path: &str, key: &str, records: Vec<Value>) {
        self.state
            .lock()
            .collections
            .insert(strip(path), (key.to_string(), records));
    }

    /// Compute GET responses for `path` from the query
    pub fn set_responder<F>(&self, path: &str, responder: F)
    where
        F: Fn(&QueryParams) -> RemoteResult<Option<Value>> + Send + Sync + 'static,
    {
        self.state
            .lock()
            .responders
            .insert(strip(path), Arc::new(responder));
    }

    pub fn set_post_response(&self, path: &str, value: Value) {
        self.state.lock().post_responses.insert(strip(path), value);
    }

    /// Fail the next call to `path` (any method) with `error`
    pub fn fail_next(&self, path: &str, error: RemoteError) {
        self.state
            .lock()
            .failures
            .entry(strip(path))
            .or_default()
            .push_back(error);
    }

    pub fn fail_times(&self, path: &str, times: usize, error: impl Fn() -> RemoteError) {
        for _ in 0..times {
            self.fail_next(path, error());
        }
    }

    pub fn store_value(&self, namespace: &str, key: &str, value: Value) {
        self.state
            .lock()
            .store
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn stored_value(&self, namespace: &str, key: &str) -> Option<Value> {
        self.state
            .lock()
            .store
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> Vec<RecordedCall> {
        let path = strip(path);
        self.calls()
            .into_iter()
            .filter(|call| call.method == method && call.path == path)
            .collect()
    }

    /// Bodies of every POST/PUT, in call order
    pub fn writes(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call.method, Method::Post | Method::Put))
            .collect()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn begin(
        &self,
        method: Method,
        path: &str,
        query: &QueryParams,
        body: Option<&Value>,
    ) -> RemoteResult<String> {
        let path = strip(path);
        let mut state = self.state.lock();
        state.calls.push(RecordedCall {
            method,
            path: path.clone(),
            query: query.to_vec(),
            body: body.cloned(),
        });
        if let Some(error) = state.failures.get_mut(&path).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(path)
    }

    fn store_key(path: &str) -> Option<(String, Option<String>)> {
        let rest = path.strip_prefix("api/dataStore/")?;
        let mut parts = rest.splitn(2, '/');
        let namespace = parts.next()?.to_string();
        let key = parts.next().map(str::to_string);
        Some((namespace, key))
    }

    fn not_found(&self, path: &str) -> RemoteError {
        RemoteError::status_error(404, self.url(path), None)
    }
}

#[async_trait]
impl RemoteApi for FakeRemoteApi {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(
        &self,
        path: &str,
        query: &QueryParams,
        _timeout: Option<Duration>,
    ) -> RemoteResult<Option<Value>> {
        let path = self.begin(Method::Get, path, query, None)?;

        let responder = self.state.lock().responders.get(&path).cloned();
        if let Some(responder) = responder {
            return responder(query);
        }

        let state = self.state.lock();
        if let Some((namespace, key)) = Self::store_key(&path) {
            let entries = state.store.get(&namespace);
            return Ok(match key {
                Some(key) => entries.and_then(|e| e.get(&key)).cloned(),
                None => entries.map(|e| json!(e.keys().collect::<Vec<_>>())),
            });
        }
        if let Some(value) = state.resources.get(&path) {
            return Ok(Some(value.clone()));
        }
        if let Some((key, records)) = state.collections.get(&path) {
            let selected: Vec<Value> = match filtered_ids(query) {
                Some(ids) => records
                    .iter()
                    .filter(|r| {
                        r.get("id")
                            .and_then(Value::as_str)
                            .is_some_and(|id| ids.iter().any(|wanted| wanted == id))
                    })
                    .cloned()
                    .collect(),
                None => records.clone(),
            };
            let mut body = serde_json::Map::new();
            body.insert(key.clone(), Value::Array(selected));
            return Ok(Some(Value::Object(body)));
        }
        Ok(None)
    }

    async fn post_json(
        &self,
        path: &str,
        query: &QueryParams,
        body: &Value,
    ) -> RemoteResult<Value> {
        let path = self.begin(Method::Post, path, query, Some(body))?;
        let mut state = self.state.lock();
        if let Some((namespace, Some(key))) = Self::store_key(&path) {
            let entries = state.store.entry(namespace).or_default();
            if entries.contains_key(&key) {
                return Err(RemoteError::status_error(409, self.url(&path), None));
            }
            entries.insert(key, body.clone());
            return Ok(json!({"httpStatus": "Created"}));
        }
        Ok(state
            .post_responses
            .get(&path)
            .cloned()
            .unwrap_or_else(|| json!({"status": "OK"})))
    }

    async fn put_json(&self, path: &str, body: &Value) -> RemoteResult<Value> {
        let path = self.begin(Method::Put, path, &[], Some(body))?;
        let mut state = self.state.lock();
        if let Some((namespace, Some(key))) = Self::store_key(&path) {
            let Some(existing) = state
                .store
                .get_mut(&namespace)
                .and_then(|entries| entries.get_mut(&key))
            else {
                return Err(self.not_found(&path));
            };
            *existing = body.clone();
            return Ok(json!({"httpStatus": "OK"}));
        }
        Ok(json!({"status": "OK"}))
    }

    async fn delete(&self, path: &str) -> RemoteResult<()> {
        let path = self.begin(Method::Delete, path, &[], None)?;
        let mut state = self.state.lock();
        if let Some((namespace, Some(key))) = Self::store_key(&path) {
            let removed = state
                .store
                .get_mut(&namespace)
                .and_then(|entries| entries.remove(&key));
            if removed.is_none() {
                return Err(self.not_found(&path));
            }
        }
        Ok(())
    }
}

/// Hands out registered fakes by base url
#[derive(Debug, Default)]
pub struct FakeClientFactory {
    clients: Mutex<HashMap<String, Arc<FakeRemoteApi>>>,
}

impl FakeClientFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, api: Arc<FakeRemoteApi>) {
        self.clients.lock().insert(api.base_url.clone(), api);
    }

    /// The fake for `base_url`, created on first use
    pub fn instance(&self, base_url: &str) -> Arc<FakeRemoteApi> {
        Arc::clone(
            self.clients
                .lock()
                .entry(base_url.to_string())
                .or_insert_with(|| FakeRemoteApi::new(base_url)),
        )
    }
}

impl RemoteClientFactory for FakeClientFactory {
    fn client(&self, connection: &ConnectionConfig) -> RemoteResult<Arc<dyn RemoteApi>> {
        let api: Arc<dyn RemoteApi> = self.instance(&connection.base_url);
        Ok(api)
    }
}
