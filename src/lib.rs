#![allow(clippy::doc_markdown)] // Allow technical terms like RabbitMQ, DLQ in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Analytics Migrator Core
//!
//! Queue-driven engine that moves aggregate analytics data and the metadata
//! behind it from a source analytics-platform instance to a destination
//! instance.
//!
//! ## Overview
//!
//! Work is split into jobs on durable broker queues, one queue set per
//! migration configuration. Jobs tolerate unreliable remote calls through
//! header-carried retry counts and dead-letter routing, and survive a
//! restart of the worker process because the broker owns every queued job.
//!
//! ## Module Organization
//!
//! - [`messaging`] - Broker connection, queue topology, publisher and consumer dispatcher
//! - [`download`] - Dimension partitioning, analytics fetch, reshaping and the legacy data worker
//! - [`mapping`] - Category-option-combo expansion and the persisted mapping table
//! - [`metadata`] - Dependency discovery, ordered metadata import, portal configuration export/import
//! - [`progress`] - Process summaries and step progress
//! - [`remote`] - HTTP access to the analytics instances and the external store
//! - [`storage`] - Intermediate payload storage
//! - [`system`] - Dependency container and caller-facing entry points
//! - [`config`] - Settings loaded from TOML and the environment
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use migrator_core::config::ConfigManager;
//! use migrator_core::messaging::{InMemoryMessagingService, MessagingService};
//! use migrator_core::system::{MigrationContext, MigrationSystem};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = ConfigManager::load()?.config().clone();
//! let shared: Arc<dyn MessagingService> = Arc::new(InMemoryMessagingService::new());
//! let data: Arc<dyn MessagingService> = Arc::new(InMemoryMessagingService::new());
//!
//! let context = Arc::new(MigrationContext::from_settings(settings, shared)?);
//! let system = MigrationSystem::new(context, data);
//! system.initialize_all_queues_from_datastore().await?;
//! system.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! cargo test -- --ignored   # Broker tests, requires RabbitMQ running
//! ```

pub mod config;
pub mod constants;
pub mod download;
pub mod error;
pub mod logging;
pub mod mapping;
pub mod messaging;
pub mod metadata;
pub mod models;
pub mod progress;
pub mod remote;
pub mod storage;
pub mod system;
pub mod test_helpers;

pub use config::{ConfigManager, MigratorConfig};
pub use constants::QueueType;
pub use download::{initialize_data_download, DataDownloadRequest, DataWorker};
pub use error::{MigratorError, MigratorResult};
pub use messaging::{
    BrokerClient, ConsumerDispatcher, Job, MessagingService, Publisher, RetryContext,
    TopologyManager,
};
pub use models::{DataItemMapping, DimensionSet, MetadataBundle, MigrationConfig};
pub use progress::ProgressTracker;
pub use system::{MigrationContext, MigrationSystem};
