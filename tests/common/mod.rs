//! Shared setup for the integration suites: an in-memory broker, fake
//! source/destination instances and a fake external store wired into a
//! [`MigrationContext`].

#![allow(dead_code)]

use std::sync::Arc;

use migrator_core::config::MigratorConfig;
use migrator_core::messaging::{InMemoryMessagingService, MessagingService};
use migrator_core::models::{ConnectionConfig, DataItemMapping, ItemConfig, MigrationConfig};
use migrator_core::progress::{InMemoryProgressTracker, ProgressTracker};
use migrator_core::remote::{Datastore, RemoteClientFactory};
use migrator_core::storage::{FileSystemStorage, IntermediateStorage};
use migrator_core::system::MigrationContext;
use migrator_core::test_helpers::{FakeClientFactory, FakeRemoteApi};
use serde_json::json;
use tempfile::TempDir;

pub const SOURCE_URL: &str = "https://source.test";
pub const DESTINATION_URL: &str = "https://destination.test";
pub const STORE_URL: &str = "https://store.test";

pub struct Harness {
    pub messaging: Arc<InMemoryMessagingService>,
    pub store: Arc<FakeRemoteApi>,
    pub source: Arc<FakeRemoteApi>,
    pub destination: Arc<FakeRemoteApi>,
    pub tracker: Arc<InMemoryProgressTracker>,
    pub context: Arc<MigrationContext>,
    // Keeps the storage directory alive for the test
    pub storage_dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(MigratorConfig::default())
    }

    pub fn with_settings(mut settings: MigratorConfig) -> Self {
        let storage_dir = tempfile::tempdir().expect("temp dir");
        settings.storage.directory = storage_dir.path().to_path_buf();

        let messaging = Arc::new(InMemoryMessagingService::new());
        let store = FakeRemoteApi::new(STORE_URL);
        let clients = FakeClientFactory::new();
        let source = clients.instance(SOURCE_URL);
        let destination = clients.instance(DESTINATION_URL);
        let tracker = Arc::new(InMemoryProgressTracker::new());

        let shared: Arc<dyn MessagingService> = messaging.clone();
        let factory: Arc<dyn RemoteClientFactory> = clients;
        let storage: Arc<dyn IntermediateStorage> =
            Arc::new(FileSystemStorage::new(storage_dir.path()));
        let progress: Arc<dyn ProgressTracker> = tracker.clone();

        let context = Arc::new(MigrationContext::new(
            settings,
            shared,
            Datastore::new(store.clone()),
            factory,
            storage,
            progress,
        ));

        Self {
            messaging,
            store,
            source,
            destination,
            tracker,
            context,
            storage_dir,
        }
    }

    /// Persist `config` where the engine looks configurations up
    pub fn seed_config(&self, config: &MigrationConfig) {
        let namespace = &self.context.settings().store.config_namespace;
        self.store.store_value(
            namespace,
            &config.id,
            serde_json::to_value(config).expect("config serializes"),
        );
    }
}

pub fn item(id: &str, data_items: Vec<DataItemMapping>, org_units: &[&str]) -> ItemConfig {
    serde_json::from_value(json!({
        "id": id,
        "dataItems": data_items,
        "orgUnits": org_units,
    }))
    .expect("item config")
}

pub fn migration_config(id: &str, items: Vec<ItemConfig>) -> MigrationConfig {
    MigrationConfig {
        id: id.to_string(),
        name: Some(format!("Migration {id}")),
        source: ConnectionConfig::new(SOURCE_URL),
        destination: ConnectionConfig::new(DESTINATION_URL),
        items_config: items,
    }
}
