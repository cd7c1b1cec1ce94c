pub mod dimensions;
pub mod mapping;
pub mod metadata_bundle;
pub mod migration_config;
pub mod portal_export;
pub mod summary;

// Re-export core models for easy access
pub use dimensions::DimensionSet;
pub use mapping::{is_qualified, merge_mappings, DataItemMapping};
pub use metadata_bundle::{CategorySet, DataItemSet, MetadataBundle, VisualizationSet};
pub use migration_config::{
    AttributeMapping, ConnectionConfig, ItemConfig, ItemType, MigrationConfig, RuntimeConfig,
};
pub use portal_export::{ConfigurationExport, NamespaceExport, NamespaceImportResult};
pub use summary::{ProcessStatus, ProcessSummaryRecord, ProcessType};
