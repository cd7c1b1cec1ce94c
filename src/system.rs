//! # Migration System
//!
//! [`MigrationContext`] is the explicit dependency container handed to every
//! pipeline: settings, the publisher and topology on the shared broker
//! channel, the external store, remote clients, intermediate storage and the
//! progress tracker.
//!
//! [`MigrationSystem`] wires the context to the consumer dispatcher and the
//! dedicated data worker, and exposes the caller-facing entry points.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::MigratorConfig;
use crate::constants::retry;
use crate::download::{
    initialize_data_download, DataDownloadRequest, DataWorker, DataWorkerConfig,
    DownloadExecutor, DownloadInitSummary, JobRoute, UploadExecutor,
};
use crate::error::{MigratorError, MigratorResult};
use crate::mapping::{generate_and_store_mappings, MappingEngine, MappingStore};
use crate::messaging::{
    ConsumerDispatcher, DataDeletionJob, DispatcherConfig, InitializationSummary, Job,
    JobHandler, MessagingService, MetadataDownloadJob, Publisher, QueueBatchReport,
    QueueHealthReport, QueueSet, RetryContext, TopologyManager,
};
use crate::metadata::{download_and_queue_metadata, export_and_queue_configuration, import_metadata_job};
use crate::models::{ConnectionConfig, DataItemMapping, MetadataBundle, MigrationConfig};
use crate::progress::{DatastoreProgressTracker, ProgressTracker};
use crate::remote::{Datastore, HttpClientFactory, RemoteApi, RemoteClientFactory};
use crate::storage::{FileSystemStorage, IntermediateStorage};

/// Shared collaborators of every pipeline
#[derive(Debug)]
pub struct MigrationContext {
    settings: MigratorConfig,
    publisher: Publisher,
    topology: Arc<TopologyManager>,
    store: Datastore,
    clients: Arc<dyn RemoteClientFactory>,
    storage: Arc<dyn IntermediateStorage>,
    tracker: Arc<dyn ProgressTracker>,
    mappings: MappingStore,
}

impl MigrationContext {
    pub fn new(
        settings: MigratorConfig,
        messaging: Arc<dyn MessagingService>,
        store: Datastore,
        clients: Arc<dyn RemoteClientFactory>,
        storage: Arc<dyn IntermediateStorage>,
        tracker: Arc<dyn ProgressTracker>,
    ) -> Self {
        let topology = Arc::new(TopologyManager::new(
            Arc::clone(&messaging),
            store.clone(),
            settings.store.config_namespace.clone(),
        ));
        let mappings = MappingStore::new(store.clone(), settings.store.mapping_namespace.clone());
        Self {
            publisher: Publisher::new(messaging),
            topology,
            store,
            clients,
            storage,
            tracker,
            mappings,
            settings,
        }
    }

    /// Production wiring: reqwest clients, filesystem storage and a store-backed tracker
    pub fn from_settings(
        settings: MigratorConfig,
        messaging: Arc<dyn MessagingService>,
    ) -> MigratorResult<Self> {
        let clients: Arc<dyn RemoteClientFactory> = Arc::new(HttpClientFactory::new(
            Duration::from_millis(settings.store.timeout_ms),
        ));
        let store = Datastore::new(clients.client(&settings.store.connection())?);
        let storage: Arc<dyn IntermediateStorage> =
            Arc::new(FileSystemStorage::new(settings.storage.directory.clone()));
        let tracker: Arc<dyn ProgressTracker> = Arc::new(DatastoreProgressTracker::new(
            store.clone(),
            settings.store.summary_namespace.clone(),
        ));
        Ok(Self::new(settings, messaging, store, clients, storage, tracker))
    }

    pub fn settings(&self) -> &MigratorConfig {
        &self.settings
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn messaging(&self) -> &Arc<dyn MessagingService> {
        self.publisher.messaging()
    }

    pub fn topology(&self) -> &Arc<TopologyManager> {
        &self.topology
    }

    pub fn store(&self) -> &Datastore {
        &self.store
    }

    pub fn storage(&self) -> &Arc<dyn IntermediateStorage> {
        &self.storage
    }

    pub fn tracker(&self) -> &dyn ProgressTracker {
        self.tracker.as_ref()
    }

    pub fn mappings(&self) -> &MappingStore {
        &self.mappings
    }

    /// Fetch a migration configuration; absence is `ConfigNotFound`
    pub async fn load_config(&self, config_id: &str) -> MigratorResult<MigrationConfig> {
        self.store
            .get_as::<MigrationConfig>(&self.settings.store.config_namespace, config_id)
            .await?
            .ok_or_else(|| MigratorError::config_not_found(config_id))
    }

    pub fn remote(&self, connection: &ConnectionConfig) -> MigratorResult<Arc<dyn RemoteApi>> {
        Ok(self.clients.client(connection)?)
    }
}

/// Routes every job kind the dispatcher consumes to its pipeline
#[derive(Debug)]
pub struct PipelineJobHandler {
    context: Arc<MigrationContext>,
    download: DownloadExecutor,
    upload: UploadExecutor,
}

impl PipelineJobHandler {
    pub fn new(context: Arc<MigrationContext>) -> Self {
        Self {
            download: DownloadExecutor::new(Arc::clone(&context)),
            upload: UploadExecutor::new(Arc::clone(&context)),
            context,
        }
    }
}

#[async_trait]
impl JobHandler for PipelineJobHandler {
    async fn handle(&self, job: Job, retry: &RetryContext) -> MigratorResult<()> {
        debug!(
            config_id = %job.config_id(),
            queue_type = %job.queue_type(),
            retry_count = retry.count,
            "Handling job"
        );
        match job {
            Job::MetadataDownload(job) => {
                download_and_queue_metadata(&self.context, &job.config_id).await?;
            }
            Job::MetadataUpload(job) => {
                import_metadata_job(&self.context, &job).await?;
            }
            Job::DataDownload(job) => {
                self.download.execute(&job, JobRoute::Topology).await?;
            }
            Job::DataUpload(job) => {
                self.upload.upload(&job).await?;
            }
            Job::DataDeletion(job) => {
                self.upload.delete(&job).await?;
            }
            Job::Failed(job) => {
                warn!(
                    config_id = %job.config_id,
                    operation = %job.operation,
                    "Failed job received; left for manual replay"
                );
            }
        }
        Ok(())
    }
}

/// The running engine: one dispatcher on the shared channel, one data worker on its own
#[derive(Debug)]
pub struct MigrationSystem {
    context: Arc<MigrationContext>,
    dispatcher: Arc<ConsumerDispatcher>,
    data_worker: Arc<DataWorker>,
}

impl MigrationSystem {
    /// `data_messaging` must not be the channel behind `context`
    pub fn new(context: Arc<MigrationContext>, data_messaging: Arc<dyn MessagingService>) -> Self {
        let settings = context.settings();
        let dispatcher_config = DispatcherConfig {
            prefetch: settings.broker.dispatcher_prefetch,
            poll_interval: settings.broker.poll_interval(),
            max_retries: retry::MAX_RETRIES,
        };
        let worker_config = DataWorkerConfig {
            prefetch: settings.broker.worker_prefetch,
            poll_interval: settings.broker.poll_interval(),
            max_job_retries: settings.download.max_job_retries,
        };

        let handler: Arc<dyn JobHandler> = Arc::new(PipelineJobHandler::new(Arc::clone(&context)));
        let dispatcher = Arc::new(ConsumerDispatcher::new(
            Arc::clone(context.messaging()),
            Arc::clone(context.topology()),
            handler,
            dispatcher_config,
        ));
        let data_worker = Arc::new(DataWorker::new(
            Arc::clone(&context),
            data_messaging,
            worker_config,
        ));
        Self {
            context,
            dispatcher,
            data_worker,
        }
    }

    pub fn context(&self) -> &Arc<MigrationContext> {
        &self.context
    }

    pub fn dispatcher(&self) -> &Arc<ConsumerDispatcher> {
        &self.dispatcher
    }

    pub fn data_worker(&self) -> &Arc<DataWorker> {
        &self.data_worker
    }

    #[instrument(skip(self))]
    pub async fn start(&self) -> MigratorResult<()> {
        self.dispatcher.start().await?;
        self.data_worker.start().await?;
        info!("✅ Migration system started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.dispatcher.stop().await;
        self.data_worker.stop().await;
        info!("Migration system stopped");
    }

    /// Returns once every `(period, item)` job is enqueued
    pub async fn initialize_data_download(
        &self,
        request: DataDownloadRequest,
    ) -> MigratorResult<DownloadInitSummary> {
        initialize_data_download(&self.context, request).await
    }

    pub async fn create_queues_for_config(&self, config_id: &str) -> MigratorResult<QueueSet> {
        self.context.topology().create_queues_for_config(config_id).await
    }

    pub async fn initialize_queues_from_datastore(&self, config_id: &str) -> MigratorResult<QueueSet> {
        self.context
            .topology()
            .initialize_queues_from_datastore(config_id)
            .await
    }

    pub async fn initialize_all_queues_from_datastore(&self) -> MigratorResult<InitializationSummary> {
        self.context
            .topology()
            .initialize_all_queues_from_datastore()
            .await
    }

    pub async fn purge_config_queues(&self, config_id: &str) -> QueueBatchReport {
        self.context.topology().purge_config_queues(config_id).await
    }

    pub async fn delete_config_queues(&self, config_id: &str) -> QueueBatchReport {
        self.context.topology().delete_config_queues(config_id).await
    }

    pub async fn verify_config_queues(&self, config_id: &str) -> MigratorResult<QueueHealthReport> {
        self.context.topology().verify_config_queues(config_id).await
    }

    /// Discover and fetch the metadata bundle now, then queue its upload
    pub async fn download_and_queue_metadata(&self, config_id: &str) -> MigratorResult<MetadataBundle> {
        download_and_queue_metadata(&self.context, config_id).await
    }

    /// Hand the metadata download to the dispatcher instead of running it inline
    pub async fn queue_metadata_download(&self, config_id: &str) -> MigratorResult<()> {
        self.context
            .publisher()
            .push_job(&Job::MetadataDownload(MetadataDownloadJob {
                config_id: config_id.to_string(),
            }))
            .await
    }

    pub async fn export_and_queue_configuration(&self, config_id: &str) -> MigratorResult<usize> {
        export_and_queue_configuration(&self.context, config_id).await
    }

    /// Queue removal of the values described by a stored payload
    pub async fn queue_data_deletion(&self, config_id: &str, filename: &str) -> MigratorResult<()> {
        self.context
            .publisher()
            .push_job(&Job::DataDeletion(DataDeletionJob {
                main_config_id: config_id.to_string(),
                filename: filename.to_string(),
            }))
            .await
    }

    /// Expand `mappings` against the configuration's instances and merge them into its table
    #[instrument(skip(self, mappings), fields(mappings = mappings.len()))]
    pub async fn generate_and_store_mappings(
        &self,
        config_id: &str,
        mappings: &[DataItemMapping],
    ) -> MigratorResult<Vec<DataItemMapping>> {
        let config = self.context.load_config(config_id).await?;
        let settings = self.context.settings();
        let engine = MappingEngine::new(
            self.context.remote(&config.source)?,
            self.context.remote(&config.destination)?,
            Duration::from_millis(settings.download.default_timeout_ms),
        )
        .with_concurrency(settings.metadata.fetch_concurrency);
        generate_and_store_mappings(&config.id, mappings, &engine, self.context.mappings()).await
    }
}
