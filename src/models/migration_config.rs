use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::constants::limits;
use crate::models::DataItemMapping;

/// Credentials and base URL of one analytics-platform instance
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Personal access token; preferred over basic credentials when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: None,
            password: None,
            token: None,
        }
    }
}

/// One migration target, persisted in the external store under its `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub source: ConnectionConfig,
    pub destination: ConnectionConfig,
    #[serde(default)]
    pub items_config: Vec<ItemConfig>,
}

impl MigrationConfig {
    /// Item configurations matching `ids`; an empty selection means all of them
    pub fn select_items(&self, ids: &[String]) -> Vec<ItemConfig> {
        self.items_config
            .iter()
            .filter(|item| ids.is_empty() || ids.contains(&item.id))
            .cloned()
            .collect()
    }
}

/// How downloaded analytics rows are reshaped into destination data values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemType {
    /// Direct id remapping of the data item column
    #[default]
    Default,
    /// Rows fan out across mapped destination attribute option combinations
    AttributeCombo,
}

/// Source attribute option and the destination attribute option combinations it fans out to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeMapping {
    pub source_id: String,
    pub ids: Vec<String>,
}

/// Per-data-source item configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub item_type: ItemType,
    #[serde(default)]
    pub data_items: Vec<DataItemMapping>,
    #[serde(default)]
    pub org_units: Vec<String>,
    /// Additional query dimensions beyond dx/pe/ou
    #[serde(default)]
    pub dimensions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<String>>,
    /// Dimension whose column carries the source attribute option (attribute-combo items)
    #[serde(default)]
    pub attribute_dimension: Option<String>,
    #[serde(default)]
    pub attribute_mappings: Vec<AttributeMapping>,
}

/// Caller-supplied, per-request parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub periods: Vec<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Analytics request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    #[serde(default)]
    pub paginate_by_data: bool,
}

fn default_page_size() -> usize {
    limits::DEFAULT_PAGE_SIZE
}

fn default_timeout_ms() -> u64 {
    limits::DEFAULT_TIMEOUT_MS
}

impl RuntimeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}
