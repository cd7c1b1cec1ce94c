//! Metadata dependency discovery.
//!
//! Each step feeds the next, so the walk is sequential; only the batched
//! id lookups inside a step run concurrently.

use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::expressions::ExpressionParser;
use crate::config::MetadataConfig;
use crate::error::MigratorResult;
use crate::models::{CategorySet, DataItemSet, MetadataBundle, VisualizationSet};
use crate::remote::{Datastore, RemoteApi};

const OWNER_FIELDS: &str = ":owner";
const MAP_FIELDS: &str = ":owner,mapViews[:owner]";

/// Batched `id:in:[...]` lookups with bounded concurrency and a pause between rounds
#[derive(Debug, Clone)]
pub struct MetadataFetcher {
    api: Arc<dyn RemoteApi>,
    ids_per_batch: usize,
    concurrency: usize,
    pause: Duration,
    timeout: Duration,
}

impl MetadataFetcher {
    pub fn new(api: Arc<dyn RemoteApi>, settings: &MetadataConfig) -> Self {
        Self {
            api,
            ids_per_batch: settings.ids_per_batch.max(1),
            concurrency: settings.fetch_concurrency.max(1),
            pause: settings.batch_pause(),
            timeout: settings.timeout(),
        }
    }

    async fn fetch_batch(&self, resource: &str, fields: &str, ids: &[String]) -> MigratorResult<Vec<Value>> {
        let query = vec![
            ("filter".to_string(), format!("id:in:[{}]", ids.join(","))),
            ("fields".to_string(), fields.to_string()),
            ("paging".to_string(), "false".to_string()),
        ];
        let response = self
            .api
            .get_json(&format!("api/{resource}"), &query, Some(self.timeout))
            .await?;
        Ok(response
            .and_then(|mut body| body.get_mut(resource).map(Value::take))
            .and_then(|records| match records {
                Value::Array(records) => Some(records),
                _ => None,
            })
            .unwrap_or_default())
    }

    /// Every `resource` record whose id is in `ids`
    pub async fn fetch_by_ids(
        &self,
        resource: &str,
        fields: &str,
        ids: &BTreeSet<String>,
    ) -> MigratorResult<Vec<Value>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = ids.iter().cloned().collect();
        let batches: Vec<&[String]> = ids.chunks(self.ids_per_batch).collect();

        let mut records = Vec::new();
        for (round, group) in batches.chunks(self.concurrency).enumerate() {
            if round > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
            let results = join_all(
                group
                    .iter()
                    .map(|batch| self.fetch_batch(resource, fields, batch)),
            )
            .await;
            for result in results {
                records.extend(result?);
            }
        }
        debug!(resource = %resource, requested = ids.len(), fetched = records.len(), "Metadata fetched");
        Ok(records)
    }
}

fn id_of(value: &Value) -> Option<String> {
    value.get("id").and_then(Value::as_str).map(str::to_string)
}

fn nested_id(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(id_of)
}

fn ids_in_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(id_of).collect())
        .unwrap_or_default()
}

/// Visualization and map ids referenced anywhere inside a module document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleReferences {
    pub visualizations: BTreeSet<String>,
    pub maps: BTreeSet<String>,
}

pub fn collect_module_references(module: &Value, refs: &mut ModuleReferences) {
    match module {
        Value::Object(fields) => {
            let kind = fields.get("type").and_then(Value::as_str);
            if let (Some(kind), Some(id)) = (kind, id_of(module)) {
                match kind.to_ascii_uppercase().as_str() {
                    "VISUALIZATION" | "CHART" | "PIVOT_TABLE" | "REPORT_TABLE" => {
                        refs.visualizations.insert(id);
                    }
                    "MAP" => {
                        refs.maps.insert(id);
                    }
                    _ => {}
                }
            }
            for child in fields.values() {
                collect_module_references(child, refs);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_module_references(item, refs);
            }
        }
        _ => {}
    }
}

/// Indicator and data element ids in `dataDimensionItems`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataItemReferences {
    pub indicators: BTreeSet<String>,
    pub data_elements: BTreeSet<String>,
}

pub fn collect_data_items(record: &Value, refs: &mut DataItemReferences) {
    let items = record
        .get("dataDimensionItems")
        .and_then(Value::as_array)
        .into_iter()
        .flatten();
    for item in items {
        if let Some(id) = nested_id(item, "indicator") {
            refs.indicators.insert(id);
        }
        if let Some(id) = nested_id(item, "dataElement") {
            refs.data_elements.insert(id);
        }
        if let Some(operand) = nested_id(item, "dataElementOperand") {
            let element = operand.split('.').next().unwrap_or_default().to_string();
            refs.data_elements.insert(element);
        }
    }
    for view in record
        .get("mapViews")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        collect_data_items(view, refs);
    }
}

/// Legend set ids referenced by `legendSet`, `legendSets` or `legend.set`
pub fn collect_legend_sets(record: &Value, ids: &mut BTreeSet<String>) {
    match record {
        Value::Object(fields) => {
            if let Some(id) = nested_id(record, "legendSet") {
                ids.insert(id);
            }
            ids.extend(ids_in_list(record, "legendSets"));
            if let Some(id) = record.get("legend").and_then(|l| nested_id(l, "set")) {
                ids.insert(id);
            }
            for child in fields.values() {
                if child.is_array() || child.is_object() {
                    collect_legend_sets(child, ids);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_legend_sets(item, ids);
            }
        }
        _ => {}
    }
}

/// Discover and fetch everything the configured modules depend on
///
/// Modules are read from `modules_store` (the destination's portal
/// configuration); metadata comes from `fetcher` (the source).
#[instrument(skip_all, fields(modules_namespace = %modules_namespace))]
pub async fn build_metadata_bundle(
    modules_store: &Datastore,
    modules_namespace: &str,
    fetcher: &MetadataFetcher,
) -> MigratorResult<MetadataBundle> {
    let parser = ExpressionParser::new()?;

    let mut module_refs = ModuleReferences::default();
    for key in modules_store.list_keys(modules_namespace).await? {
        if let Some(module) = modules_store.get(modules_namespace, &key).await? {
            collect_module_references(&module, &mut module_refs);
        }
    }

    let visualizations = fetcher
        .fetch_by_ids("visualizations", OWNER_FIELDS, &module_refs.visualizations)
        .await?;
    let maps = fetcher
        .fetch_by_ids("maps", MAP_FIELDS, &module_refs.maps)
        .await?;

    let mut data_refs = DataItemReferences::default();
    for record in visualizations.iter().chain(&maps) {
        collect_data_items(record, &mut data_refs);
    }

    let indicators = fetcher
        .fetch_by_ids("indicators", OWNER_FIELDS, &data_refs.indicators)
        .await?;
    for indicator in &indicators {
        for side in ["numerator", "denominator"] {
            if let Some(expression) = indicator.get(side).and_then(Value::as_str) {
                data_refs
                    .data_elements
                    .extend(parser.parse(expression).data_elements);
            }
        }
    }
    let data_elements = fetcher
        .fetch_by_ids("dataElements", OWNER_FIELDS, &data_refs.data_elements)
        .await?;

    let indicator_type_ids: BTreeSet<String> = indicators
        .iter()
        .filter_map(|i| nested_id(i, "indicatorType"))
        .collect();
    let indicator_types = fetcher
        .fetch_by_ids("indicatorTypes", OWNER_FIELDS, &indicator_type_ids)
        .await?;

    let categories = fetch_category_closure(fetcher, &data_elements).await?;

    let mut legend_ids = BTreeSet::new();
    for record in indicators
        .iter()
        .chain(&data_elements)
        .chain(&visualizations)
        .chain(&maps)
    {
        collect_legend_sets(record, &mut legend_ids);
    }
    let legend_sets = fetcher
        .fetch_by_ids("legendSets", OWNER_FIELDS, &legend_ids)
        .await?;

    let bundle = MetadataBundle {
        legend_sets,
        visualizations: VisualizationSet {
            maps,
            visualizations,
        },
        data_items: DataItemSet {
            indicators,
            data_elements,
        },
        indicator_types,
        categories,
    }
    .normalized();

    info!(objects = bundle.object_count(), "Metadata bundle assembled");
    Ok(bundle)
}

async fn fetch_category_closure(
    fetcher: &MetadataFetcher,
    data_elements: &[Value],
) -> MigratorResult<CategorySet> {
    let combo_ids: BTreeSet<String> = data_elements
        .iter()
        .filter_map(|de| nested_id(de, "categoryCombo"))
        .collect();
    let category_combos = fetcher
        .fetch_by_ids("categoryCombos", OWNER_FIELDS, &combo_ids)
        .await?;

    let category_ids: BTreeSet<String> = category_combos
        .iter()
        .flat_map(|cc| ids_in_list(cc, "categories"))
        .collect();
    let option_combo_ids: BTreeSet<String> = category_combos
        .iter()
        .flat_map(|cc| ids_in_list(cc, "categoryOptionCombos"))
        .collect();

    let categories = fetcher
        .fetch_by_ids("categories", OWNER_FIELDS, &category_ids)
        .await?;
    let option_ids: BTreeSet<String> = categories
        .iter()
        .flat_map(|c| ids_in_list(c, "categoryOptions"))
        .collect();

    let category_options = fetcher
        .fetch_by_ids("categoryOptions", OWNER_FIELDS, &option_ids)
        .await?;
    let category_option_combos = fetcher
        .fetch_by_ids("categoryOptionCombos", OWNER_FIELDS, &option_combo_ids)
        .await?;

    Ok(CategorySet {
        categories,
        category_combos,
        category_options,
        category_option_combos,
    })
}
