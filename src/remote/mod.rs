//! # Remote Instances
//!
//! HTTP access to the source and destination analytics platforms and to the
//! external store holding migration configurations and mapping tables.

pub mod client;
pub mod datastore;
pub mod error;

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use client::{HttpRemoteClient, QueryParams, RemoteApi};
pub use datastore::Datastore;
pub use error::{RemoteError, RemoteResult};

use crate::models::ConnectionConfig;

/// Builds a [`RemoteApi`] for a connection
pub trait RemoteClientFactory: Send + Sync + fmt::Debug {
    fn client(&self, connection: &ConnectionConfig) -> RemoteResult<Arc<dyn RemoteApi>>;
}

/// Creates reqwest clients, reusing one per distinct connection
#[derive(Debug)]
pub struct HttpClientFactory {
    default_timeout: Duration,
    clients: DashMap<ConnectionConfig, Arc<dyn RemoteApi>>,
}

impl HttpClientFactory {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            clients: DashMap::new(),
        }
    }
}

impl RemoteClientFactory for HttpClientFactory {
    fn client(&self, connection: &ConnectionConfig) -> RemoteResult<Arc<dyn RemoteApi>> {
        if let Some(existing) = self.clients.get(connection) {
            return Ok(Arc::clone(existing.value()));
        }
        let client: Arc<dyn RemoteApi> =
            Arc::new(HttpRemoteClient::new(connection, self.default_timeout)?);
        self.clients
            .insert(connection.clone(), Arc::clone(&client));
        Ok(client)
    }
}
