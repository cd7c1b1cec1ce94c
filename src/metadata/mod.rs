//! # Metadata Migration
//!
//! Moves the metadata that dashboards depend on, and the portal
//! configuration itself, from the source instance to the destination.
//!
//! Both directions go through the `metadata-upload` queue: the download side
//! assembles a payload and publishes it, the upload side validates and
//! imports it.

pub mod configuration;
pub mod download;
pub mod expressions;
pub mod upload;

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::error::MigratorResult;
use crate::messaging::{Job, MetadataPayload, MetadataUploadJob};
use crate::models::{MetadataBundle, NamespaceImportResult, ProcessSummaryRecord, ProcessType};
use crate::progress::{failure_record, record_quietly};
use crate::remote::Datastore;
use crate::system::MigrationContext;

pub use configuration::{export_configuration, import_configuration, is_static_module};
pub use download::{build_metadata_bundle, MetadataFetcher};
pub use expressions::{ExpressionParser, ExpressionRefs};
pub use upload::{upload_metadata, upload_steps, MetadataUploadReport, StepReport, UploadStep};

/// Result of handling one metadata-upload job
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataImportOutcome {
    Metadata(MetadataUploadReport),
    Configuration(Vec<NamespaceImportResult>),
}

/// Assemble the dependency bundle for `config_id` and queue it for upload
#[instrument(skip(context))]
pub async fn download_and_queue_metadata(
    context: &MigrationContext,
    config_id: &str,
) -> MigratorResult<MetadataBundle> {
    let result = assemble_and_queue_metadata(context, config_id).await;
    let record = match &result {
        Ok(bundle) => ProcessSummaryRecord::downloaded(bundle.object_count()),
        Err(err) => {
            warn!(config_id = %config_id, error = %err, "Metadata download failed");
            failure_record(ProcessType::Download, err)
        }
    };
    record_quietly(context.tracker(), config_id, record).await;
    result
}

async fn assemble_and_queue_metadata(
    context: &MigrationContext,
    config_id: &str,
) -> MigratorResult<MetadataBundle> {
    let config = context.load_config(config_id).await?;
    let settings = context.settings();
    let destination = Datastore::new(context.remote(&config.destination)?);
    let fetcher = MetadataFetcher::new(context.remote(&config.source)?, &settings.metadata);

    let bundle =
        build_metadata_bundle(&destination, &settings.portal.modules_namespace, &fetcher).await?;

    let job = Job::MetadataUpload(MetadataUploadJob {
        config_id: config.id.clone(),
        payload: MetadataPayload::Metadata(serde_json::to_value(&bundle)?),
    });
    context.publisher().push_job(&job).await?;
    info!(config_id = %config.id, objects = bundle.object_count(), "✅ Metadata queued for upload");
    Ok(bundle)
}

/// Export the source portal configuration and queue it for import
#[instrument(skip(context))]
pub async fn export_and_queue_configuration(
    context: &MigrationContext,
    config_id: &str,
) -> MigratorResult<usize> {
    let result = export_and_queue(context, config_id).await;
    let record = match &result {
        Ok(keys) => ProcessSummaryRecord::downloaded(*keys),
        Err(err) => {
            warn!(config_id = %config_id, error = %err, "Configuration export failed");
            failure_record(ProcessType::Download, err)
        }
    };
    record_quietly(context.tracker(), config_id, record).await;
    result
}

async fn export_and_queue(context: &MigrationContext, config_id: &str) -> MigratorResult<usize> {
    let config = context.load_config(config_id).await?;
    let source = Datastore::new(context.remote(&config.source)?);
    let export = export_configuration(&source, &context.settings().portal).await?;
    let keys = export.key_count();

    let job = Job::MetadataUpload(MetadataUploadJob {
        config_id: config.id.clone(),
        payload: MetadataPayload::Configuration(export),
    });
    context.publisher().push_job(&job).await?;
    info!(config_id = %config.id, keys = keys, "✅ Portal configuration queued for import");
    Ok(keys)
}

/// Import a metadata-upload job into the configuration's destination
///
/// Success and failure both leave an upload summary record.
pub async fn import_metadata_job(
    context: &MigrationContext,
    job: &MetadataUploadJob,
) -> MigratorResult<MetadataImportOutcome> {
    let result = import(context, job).await;
    let record = match &result {
        Ok(MetadataImportOutcome::Metadata(report)) => {
            ProcessSummaryRecord::uploaded(serde_json::to_value(report).unwrap_or_default())
        }
        Ok(MetadataImportOutcome::Configuration(results)) => {
            let mut summary = serde_json::Map::new();
            summary.insert(
                "namespaces".to_string(),
                serde_json::to_value(results).unwrap_or_default(),
            );
            ProcessSummaryRecord::uploaded(Value::Object(summary))
        }
        Err(err) => {
            warn!(config_id = %job.config_id, error = %err, "Metadata import failed");
            failure_record(ProcessType::Upload, err)
        }
    };
    record_quietly(context.tracker(), &job.config_id, record).await;
    result
}

async fn import(
    context: &MigrationContext,
    job: &MetadataUploadJob,
) -> MigratorResult<MetadataImportOutcome> {
    match &job.payload {
        MetadataPayload::Metadata(metadata) => {
            // Structural validation precedes every network call, config lookup included
            MetadataBundle::from_value(metadata)?;
            let config = context.load_config(&job.config_id).await?;
            let destination = context.remote(&config.destination)?;
            upload_metadata(
                destination.as_ref(),
                context.tracker(),
                &job.config_id,
                metadata,
                context.settings().metadata.category_split_threshold,
            )
            .await
            .map(MetadataImportOutcome::Metadata)
        }
        MetadataPayload::Configuration(export) => {
            let config = context.load_config(&job.config_id).await?;
            let destination = Datastore::new(context.remote(&config.destination)?);
            Ok(MetadataImportOutcome::Configuration(
                import_configuration(&destination, export).await,
            ))
        }
    }
}

