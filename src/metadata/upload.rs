//! Ordered metadata import.
//!
//! Steps run in dependency order: legend sets, indicator types, categories,
//! data items, then visualizations and maps. Each step posts to the
//! destination's metadata endpoint and reports `current/total` progress.

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};

use crate::error::MigratorResult;
use crate::models::{MetadataBundle, ProcessType};
use crate::progress::{update_progress_quietly, Progress, ProgressTracker};
use crate::remote::RemoteApi;

pub const METADATA_ENDPOINT: &str = "api/metadata";
pub const UPLOAD_STEPS: usize = 5;

/// One POST worth of metadata
#[derive(Debug, Clone, PartialEq)]
pub struct UploadStep {
    pub name: &'static str,
    pub posts: Vec<Value>,
}

impl UploadStep {
    fn single(name: &'static str, body: Value) -> Self {
        Self {
            name,
            posts: vec![body],
        }
    }

    pub fn object_count(&self) -> usize {
        self.posts.iter().map(count_objects).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.object_count() == 0
    }
}

fn count_objects(body: &Value) -> usize {
    body.as_object()
        .map(|fields| {
            fields
                .values()
                .filter_map(Value::as_array)
                .map(Vec::len)
                .sum()
        })
        .unwrap_or(0)
}

fn body_of(entries: &[(&str, &Vec<Value>)]) -> Value {
    let mut body = Map::new();
    for (key, records) in entries {
        body.insert((*key).to_string(), Value::Array((*records).clone()));
    }
    Value::Object(body)
}

/// Split a bundle into its five ordered steps
///
/// Category records are posted per collection once there are more than
/// `category_split_threshold` of them.
pub fn upload_steps(bundle: &MetadataBundle, category_split_threshold: usize) -> Vec<UploadStep> {
    let categories = &bundle.categories;
    let category_entries = [
        ("categoryOptions", &categories.category_options),
        ("categories", &categories.categories),
        ("categoryCombos", &categories.category_combos),
        ("categoryOptionCombos", &categories.category_option_combos),
    ];
    let category_step = if categories.len() > category_split_threshold {
        UploadStep {
            name: "categories",
            posts: category_entries
                .iter()
                .map(|entry| body_of(std::slice::from_ref(entry)))
                .collect(),
        }
    } else {
        UploadStep::single("categories", body_of(&category_entries))
    };

    vec![
        UploadStep::single("legendSets", json!({ "legendSets": bundle.legend_sets })),
        UploadStep::single(
            "indicatorTypes",
            json!({ "indicatorTypes": bundle.indicator_types }),
        ),
        category_step,
        UploadStep::single(
            "dataItems",
            json!({
                "indicators": bundle.data_items.indicators,
                "dataElements": bundle.data_items.data_elements,
            }),
        ),
        UploadStep::single(
            "visualizations",
            json!({
                "visualizations": bundle.visualizations.visualizations,
                "maps": bundle.visualizations.maps,
            }),
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub name: String,
    pub objects: usize,
    pub skipped: bool,
    pub responses: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUploadReport {
    pub steps: Vec<StepReport>,
}

impl MetadataUploadReport {
    pub fn uploaded_objects(&self) -> usize {
        self.steps.iter().map(|s| s.objects).sum()
    }
}

/// Validate `metadata` and import it into `destination` step by step
///
/// Validation happens before any request, so a malformed bundle never
/// reaches the destination. Empty steps are skipped but still advance the
/// reported progress.
#[instrument(skip_all, fields(config_id = %config_id))]
pub async fn upload_metadata(
    destination: &dyn RemoteApi,
    tracker: &dyn ProgressTracker,
    config_id: &str,
    metadata: &Value,
    category_split_threshold: usize,
) -> MigratorResult<MetadataUploadReport> {
    let bundle = MetadataBundle::from_value(metadata)?.normalized();
    let steps = upload_steps(&bundle, category_split_threshold);
    let total = steps.len();
    let query = vec![(
        "importStrategy".to_string(),
        "CREATE_AND_UPDATE".to_string(),
    )];

    let mut report = MetadataUploadReport::default();
    for (index, step) in steps.into_iter().enumerate() {
        let objects = step.object_count();
        let mut responses = Vec::new();
        if objects > 0 {
            for body in step.posts.iter().filter(|body| count_objects(body) > 0) {
                responses.push(destination.post_json(METADATA_ENDPOINT, &query, body).await?);
            }
            debug!(step = step.name, objects = objects, "Metadata step imported");
        } else {
            debug!(step = step.name, "Metadata step empty, skipping");
        }
        report.steps.push(StepReport {
            name: step.name.to_string(),
            objects,
            skipped: objects == 0,
            responses,
        });
        update_progress_quietly(
            tracker,
            config_id,
            ProcessType::Upload,
            Progress::new(index + 1, total),
        )
        .await;
    }

    info!(
        config_id = %config_id,
        objects = report.uploaded_objects(),
        "✅ Metadata imported"
    );
    Ok(report)
}
