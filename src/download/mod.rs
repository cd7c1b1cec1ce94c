//! # Download Pipeline
//!
//! Expands a caller's request into one download job per
//! `(period, item configuration)`, then per job: partition oversized
//! dimension sets, fetch analytics with a timeout, reshape, store, and hand
//! the stored payload to the upload queue.

pub mod analytics;
pub mod executor;
pub mod partition;
pub mod worker;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::MigratorResult;
use crate::mapping::MappingEngine;
use crate::messaging::DataDownloadJob;
use crate::models::RuntimeConfig;
use crate::system::MigrationContext;

pub use analytics::{fetch_analytics, reshape, AnalyticsResult, DataValue};
pub use executor::{DownloadExecutor, DownloadOutcome, JobRoute, UploadExecutor, UploadOutcome};
pub use partition::{base_dimensions, heavy_dimension, partition, plan, DownloadPlan};
pub use worker::{DataLane, DataWorker, DataWorkerConfig, WorkerOutcome, WorkerStats};

/// `initializeDataDownload` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDownloadRequest {
    pub main_config_id: String,
    /// Item configurations to download; empty selects all
    #[serde(default)]
    pub data_items_config_ids: Vec<String>,
    pub runtime_config: RuntimeConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadInitSummary {
    pub config_id: String,
    pub items: usize,
    pub periods: usize,
    pub jobs_enqueued: usize,
}

/// Resolve the configuration, expand item mappings and enqueue one job per `(period, item)`
///
/// Returns once the jobs are enqueued. A missing configuration propagates
/// as `ConfigNotFound`.
#[instrument(skip(context, request), fields(config_id = %request.main_config_id))]
pub async fn initialize_data_download(
    context: &MigrationContext,
    request: DataDownloadRequest,
) -> MigratorResult<DownloadInitSummary> {
    let config = context.load_config(&request.main_config_id).await?;
    let items = config.select_items(&request.data_items_config_ids);
    let runtime = request.runtime_config;
    let mut summary = DownloadInitSummary {
        config_id: config.id.clone(),
        items: items.len(),
        periods: runtime.periods.len(),
        jobs_enqueued: 0,
    };
    if items.is_empty() || runtime.periods.is_empty() {
        warn!(config_id = %config.id, "Nothing to download");
        return Ok(summary);
    }

    let engine = MappingEngine::new(
        context.remote(&config.source)?,
        context.remote(&config.destination)?,
        runtime.timeout(),
    )
    .with_concurrency(context.settings().metadata.fetch_concurrency);

    let mut sanitized = Vec::with_capacity(items.len());
    for mut item in items {
        item.data_items = engine.process_data_items(&item.data_items).await?;
        sanitized.push(item);
    }

    context.topology().assert_legacy_queues(&config.id).await?;
    let publisher = context.publisher();
    for period in &runtime.periods {
        for item in &sanitized {
            let job = DataDownloadJob {
                job_id: Some(Uuid::new_v4()),
                main_config_id: config.id.clone(),
                main_config: config.clone(),
                period_id: period.clone(),
                item_config: item.clone(),
                runtime_config: runtime.clone(),
                override_dimensions: None,
            };
            publisher.push_to_download_queue(&config.id, &job).await?;
            summary.jobs_enqueued += 1;
        }
    }

    info!(
        config_id = %config.id,
        jobs = summary.jobs_enqueued,
        "✅ Data download jobs enqueued"
    );
    Ok(summary)
}
