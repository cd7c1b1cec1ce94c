//! Analytics fetch and reshaping into destination data values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::constants::dimensions;
use crate::error::{MigratorError, MigratorResult};
use crate::models::{DimensionSet, ItemConfig, ItemType};
use crate::remote::RemoteApi;

#[derive(Debug, Clone, Deserialize)]
struct Header {
    name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawAnalytics {
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

/// Tabular analytics result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyticsResult {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl AnalyticsResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn require_column(&self, name: &str) -> MigratorResult<usize> {
        self.column(name).ok_or_else(|| {
            MigratorError::malformed(format!("analytics response has no {name} column"))
        })
    }

    pub fn from_value(value: Value) -> MigratorResult<Self> {
        let raw: RawAnalytics = serde_json::from_value(value)?;
        Ok(Self {
            headers: raw.headers.into_iter().map(|h| h.name).collect(),
            rows: raw
                .rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|cell| match cell {
                            Value::String(text) => text,
                            other => other.to_string(),
                        })
                        .collect()
                })
                .collect(),
        })
    }
}

/// Fetch `set` from the source's analytics endpoint within `timeout`
pub async fn fetch_analytics(
    api: &dyn RemoteApi,
    set: &DimensionSet,
    timeout: Duration,
) -> MigratorResult<AnalyticsResult> {
    let mut query = set.to_query_params();
    query.push(("skipMeta".to_string(), "true".to_string()));
    let response = api.get_json("api/analytics", &query, Some(timeout)).await?;
    let result = match response {
        Some(value) => AnalyticsResult::from_value(value)?,
        None => AnalyticsResult::default(),
    };
    debug!(rows = result.rows.len(), instance = %api.base_url(), "Analytics fetched");
    Ok(result)
}

/// One value in a destination data value set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataValue {
    pub data_element: String,
    pub period: String,
    pub org_unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_option_combo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_option_combo: Option<String>,
    pub value: String,
}

/// Turn analytics rows into destination data values for `item`
///
/// Source ids in `dx` are remapped through the item's mappings, one value per
/// mapped destination (unmapped ids pass through), and split into element and
/// option combo. Attribute-combo
/// items fan each row out to every destination attribute combo mapped from
/// the row's attribute option; rows without such a mapping are dropped.
pub fn reshape(result: &AnalyticsResult, item: &ItemConfig) -> MigratorResult<Vec<DataValue>> {
    let dx = result.require_column(dimensions::DATA)?;
    let pe = result.require_column(dimensions::PERIOD)?;
    let ou = result.require_column(dimensions::ORG_UNIT)?;
    let value = result.require_column("value")?;

    // Name-matched reconciliation can map several destinations to one source
    let mut remap: HashMap<&str, Vec<&str>> = HashMap::new();
    for mapping in &item.data_items {
        remap
            .entry(mapping.source_id.as_str())
            .or_default()
            .push(mapping.id.as_str());
    }

    let attribute = match (item.item_type, &item.attribute_dimension) {
        (ItemType::AttributeCombo, Some(name)) => Some(result.require_column(name)?),
        (ItemType::AttributeCombo, None) => {
            return Err(MigratorError::malformed(format!(
                "item {} is attributeCombo without an attribute dimension",
                item.id
            )))
        }
        (ItemType::Default, _) => None,
    };

    let mut values = Vec::with_capacity(result.rows.len());
    for row in &result.rows {
        let cell = |index: usize| row.get(index).cloned().unwrap_or_default();
        let source_id = cell(dx);
        let unmapped = [source_id.as_str()];
        let destination_ids = remap
            .get(source_id.as_str())
            .map_or(&unmapped[..], Vec::as_slice);

        for destination_id in destination_ids {
            let (data_element, combo) = match destination_id.split_once('.') {
                Some((element, combo)) => (element.to_string(), Some(combo.to_string())),
                None => (destination_id.to_string(), None),
            };
            let base = DataValue {
                data_element,
                period: cell(pe),
                org_unit: cell(ou),
                category_option_combo: combo,
                attribute_option_combo: None,
                value: cell(value),
            };

            match attribute {
                None => values.push(base),
                Some(column) => {
                    let option = cell(column);
                    for mapping in item
                        .attribute_mappings
                        .iter()
                        .filter(|m| m.source_id == option)
                    {
                        values.extend(mapping.ids.iter().map(|aoc| DataValue {
                            attribute_option_combo: Some(aoc.clone()),
                            ..base.clone()
                        }));
                    }
                }
            }
        }
    }
    Ok(values)
}
