//! Metadata bundle moved from the download side to the upload side.
//!
//! Objects are kept as raw JSON: the engine only ever inspects ids, names
//! and references, and forwards everything else untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::constants::DEFAULT_RECORD_NAME;
use crate::error::{MigratorError, MigratorResult};

const TOP_LEVEL_KEYS: [&str; 5] = [
    "legendSets",
    "visualizations",
    "dataItems",
    "indicatorTypes",
    "categories",
];

const CATEGORY_KEYS: [&str; 4] = [
    "categories",
    "categoryCombos",
    "categoryOptions",
    "categoryOptionCombos",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationSet {
    pub maps: Vec<Value>,
    pub visualizations: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataItemSet {
    pub indicators: Vec<Value>,
    pub data_elements: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySet {
    pub categories: Vec<Value>,
    pub category_combos: Vec<Value>,
    pub category_options: Vec<Value>,
    pub category_option_combos: Vec<Value>,
}

impl CategorySet {
    pub fn len(&self) -> usize {
        self.categories.len()
            + self.category_combos.len()
            + self.category_options.len()
            + self.category_option_combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataBundle {
    pub legend_sets: Vec<Value>,
    pub visualizations: VisualizationSet,
    pub data_items: DataItemSet,
    pub indicator_types: Vec<Value>,
    pub categories: CategorySet,
}

impl MetadataBundle {
    /// Parse a bundle, rejecting payloads missing any top-level or category key
    pub fn from_value(value: &Value) -> MigratorResult<Self> {
        for key in TOP_LEVEL_KEYS {
            if value.get(key).is_none() {
                return Err(MigratorError::invalid_bundle(key));
            }
        }
        let categories = &value["categories"];
        for key in CATEGORY_KEYS {
            if categories.get(key).is_none() {
                return Err(MigratorError::invalid_bundle(format!("categories.{key}")));
            }
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    /// De-duplicate every collection by id and strip source-side default records
    pub fn normalized(mut self) -> Self {
        for collection in [
            &mut self.legend_sets,
            &mut self.visualizations.maps,
            &mut self.visualizations.visualizations,
            &mut self.data_items.indicators,
            &mut self.data_items.data_elements,
            &mut self.indicator_types,
        ] {
            dedup_by_id(collection);
        }
        for collection in [
            &mut self.categories.categories,
            &mut self.categories.category_combos,
            &mut self.categories.category_options,
            &mut self.categories.category_option_combos,
        ] {
            dedup_by_id(collection);
            collection.retain(|record| !is_default_record(record));
        }
        self
    }

    pub fn object_count(&self) -> usize {
        self.legend_sets.len()
            + self.visualizations.maps.len()
            + self.visualizations.visualizations.len()
            + self.data_items.indicators.len()
            + self.data_items.data_elements.len()
            + self.indicator_types.len()
            + self.categories.len()
    }
}

/// Keep the first record per `id`; records without an id are kept as-is
pub fn dedup_by_id(records: &mut Vec<Value>) {
    let mut seen = HashSet::new();
    records.retain(|record| match record.get("id").and_then(Value::as_str) {
        Some(id) => seen.insert(id.to_string()),
        None => true,
    });
}

fn is_default_record(record: &Value) -> bool {
    record.get("name").and_then(Value::as_str) == Some(DEFAULT_RECORD_NAME)
}
