//! Per-job download, upload and deletion execution.
//!
//! Every failure is recorded as a `FAILED` process summary before the error
//! is returned, so the retry decision taken by the caller never hides it.

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::analytics::{fetch_analytics, reshape};
use super::partition::{base_dimensions, plan, DownloadPlan};
use crate::error::MigratorResult;
use crate::messaging::{DataDeletionJob, DataDownloadJob, DataUploadJob, Job};
use crate::models::{DimensionSet, ProcessSummaryRecord, ProcessType};
use crate::progress::{failure_record, record_quietly};
use crate::system::MigrationContext;

/// Which queue family follow-up jobs are published to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRoute {
    /// `<configId>-<kind>-queue`, served by the consumer dispatcher
    Topology,
    /// `download_<configId>` / `upload_<configId>`, served by the data worker
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Partitioned { children: usize },
    NoData,
    Stored { filename: String, count: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub import_summary: Value,
}

#[derive(Debug, Clone)]
pub struct DownloadExecutor {
    context: Arc<MigrationContext>,
}

impl DownloadExecutor {
    pub fn new(context: Arc<MigrationContext>) -> Self {
        Self { context }
    }

    /// Partition, or fetch, store and hand off to upload
    #[instrument(skip(self, job), fields(config_id = %job.main_config_id, period = %job.period_id, item = %job.item_config.id))]
    pub async fn execute(&self, job: &DataDownloadJob, route: JobRoute) -> MigratorResult<DownloadOutcome> {
        match self.run(job, route).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(job_id = ?job.job_id, error = %err, "Download failed");
                record_quietly(
                    self.context.tracker(),
                    &job.main_config_id,
                    failure_record(ProcessType::Download, &err).for_period(&job.period_id),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn run(&self, job: &DataDownloadJob, route: JobRoute) -> MigratorResult<DownloadOutcome> {
        let runtime = &job.runtime_config;
        let base = base_dimensions(&job.item_config, &job.period_id);

        let set = match plan(
            &base,
            job.override_dimensions.as_ref(),
            runtime.page_size,
            runtime.paginate_by_data,
        )? {
            DownloadPlan::Partition(partitions) => {
                let children = partitions.len();
                self.publish_children(job, partitions, route).await?;
                info!(job_id = ?job.job_id, children = children, "Job partitioned");
                return Ok(DownloadOutcome::Partitioned { children });
            }
            DownloadPlan::Fetch(set) => set,
        };

        let source = self.context.remote(&job.main_config.source)?;
        let result = fetch_analytics(source.as_ref(), &set, runtime.timeout()).await?;
        let config_id = &job.main_config_id;
        if result.is_empty() {
            record_quietly(
                self.context.tracker(),
                config_id,
                ProcessSummaryRecord::no_data().for_period(&job.period_id),
            )
            .await;
            return Ok(DownloadOutcome::NoData);
        }

        let values = reshape(&result, &job.item_config)?;
        let count = values.len();
        let filename = self
            .context
            .storage()
            .store(config_id, &json!({ "dataValues": values }))
            .await?;
        record_quietly(
            self.context.tracker(),
            config_id,
            ProcessSummaryRecord::downloaded(count).for_period(&job.period_id),
        )
        .await;

        // The stored file is durable before its upload job exists
        let upload = DataUploadJob {
            main_config_id: config_id.clone(),
            filename: filename.clone(),
            period_id: Some(job.period_id.clone()),
        };
        let publisher = self.context.publisher();
        match route {
            JobRoute::Topology => publisher.push_job(&Job::DataUpload(upload)).await?,
            JobRoute::Legacy => publisher.push_to_upload_queue(config_id, &upload).await?,
        }

        debug!(filename = %filename, count = count, "Download stored");
        Ok(DownloadOutcome::Stored { filename, count })
    }

    async fn publish_children(
        &self,
        job: &DataDownloadJob,
        partitions: Vec<DimensionSet>,
        route: JobRoute,
    ) -> MigratorResult<()> {
        let publisher = self.context.publisher();
        let concurrency = self.context.settings().download.publish_concurrency.max(1);

        let results: Vec<MigratorResult<()>> = stream::iter(partitions)
            .map(|partition| {
                let child = job.child(partition);
                async move {
                    match route {
                        JobRoute::Topology => publisher.push_job(&Job::DataDownload(child)).await,
                        JobRoute::Legacy => {
                            publisher
                                .push_to_download_queue(&child.main_config_id, &child)
                                .await
                        }
                    }
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        results.into_iter().collect()
    }
}

/// Submits stored payloads to the destination
#[derive(Debug, Clone)]
pub struct UploadExecutor {
    context: Arc<MigrationContext>,
}

impl UploadExecutor {
    pub fn new(context: Arc<MigrationContext>) -> Self {
        Self { context }
    }

    /// Post the stored payload; it is removed only after the post succeeds
    #[instrument(skip(self, job), fields(config_id = %job.main_config_id, filename = %job.filename))]
    pub async fn upload(&self, job: &DataUploadJob) -> MigratorResult<UploadOutcome> {
        let result = self
            .submit(&job.main_config_id, &job.filename, "CREATE_AND_UPDATE")
            .await;
        let record = match &result {
            Ok(outcome) => ProcessSummaryRecord::uploaded(outcome.import_summary.clone()),
            Err(err) => failure_record(ProcessType::Upload, err),
        };
        let record = match &job.period_id {
            Some(period) => record.for_period(period),
            None => record,
        };
        record_quietly(self.context.tracker(), &job.main_config_id, record).await;
        result
    }

    /// Re-submit a stored payload with the delete import strategy
    #[instrument(skip(self, job), fields(config_id = %job.main_config_id, filename = %job.filename))]
    pub async fn delete(&self, job: &DataDeletionJob) -> MigratorResult<UploadOutcome> {
        let result = self
            .submit(&job.main_config_id, &job.filename, "DELETE")
            .await;
        if let Err(err) = &result {
            record_quietly(
                self.context.tracker(),
                &job.main_config_id,
                failure_record(ProcessType::Upload, err),
            )
            .await;
        }
        result
    }

    async fn submit(
        &self,
        config_id: &str,
        filename: &str,
        strategy: &str,
    ) -> MigratorResult<UploadOutcome> {
        let config = self.context.load_config(config_id).await?;
        let destination = self.context.remote(&config.destination)?;
        let storage = self.context.storage();

        let payload = storage.load(config_id, filename).await?;
        let query = vec![("importStrategy".to_string(), strategy.to_string())];
        let import_summary = destination
            .post_json("api/dataValueSets", &query, &payload)
            .await?;
        storage.remove(config_id, filename).await?;

        info!(
            config_id = %config_id,
            filename = %filename,
            strategy = %strategy,
            "✅ Data values submitted"
        );
        Ok(UploadOutcome { import_summary })
    }
}
