use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Every key of one portal namespace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceExport {
    pub namespace: String,
    pub entries: BTreeMap<String, Value>,
}

/// Portal configuration in import order: main, modules, then static namespaces
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationExport {
    pub namespaces: Vec<NamespaceExport>,
}

impl ConfigurationExport {
    pub fn key_count(&self) -> usize {
        self.namespaces.iter().map(|ns| ns.entries.len()).sum()
    }
}

/// Outcome of importing one namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceImportResult {
    pub namespace: String,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl NamespaceImportResult {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> usize {
        self.created + self.updated
    }
}
