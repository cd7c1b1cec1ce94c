use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dimension name to ordered identifiers, plus filters of the same shape
///
/// Absent dimensions are omitted rather than stored empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSet {
    #[serde(default)]
    dimensions: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    filters: BTreeMap<String, Vec<String>>,
}

impl DimensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a dimension; empty value lists are dropped
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        if values.is_empty() {
            self.dimensions.remove(&name);
        } else {
            self.dimensions.insert(name, values);
        }
    }

    pub fn insert_filter(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        if values.is_empty() {
            self.filters.remove(&name);
        } else {
            self.filters.insert(name, values);
        }
    }

    pub fn with_dimension(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.insert(name, values);
        self
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.dimensions.get(name).map(Vec::as_slice)
    }

    pub fn dimensions(&self) -> &BTreeMap<String, Vec<String>> {
        &self.dimensions
    }

    pub fn filters(&self) -> &BTreeMap<String, Vec<String>> {
        &self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// A copy with every dimension named in `overrides` replaced
    pub fn overridden_by(&self, overrides: &DimensionSet) -> DimensionSet {
        let mut merged = self.clone();
        for (name, values) in &overrides.dimensions {
            merged.insert(name.clone(), values.clone());
        }
        for (name, values) in &overrides.filters {
            merged.insert_filter(name.clone(), values.clone());
        }
        merged
    }

    /// Analytics query parameters: one `dimension=name:a;b` per dimension, same for filters
    pub fn to_query_params(&self) -> Vec<(String, String)> {
        let render = |(name, values): (&String, &Vec<String>)| format!("{name}:{}", values.join(";"));
        self.dimensions
            .iter()
            .map(|entry| ("dimension".to_string(), render(entry)))
            .chain(
                self.filters
                    .iter()
                    .map(|entry| ("filter".to_string(), render(entry))),
            )
            .collect()
    }
}
