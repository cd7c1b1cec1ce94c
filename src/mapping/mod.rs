//! # Identifier Mapping Engine
//!
//! Expands declared `{id, sourceId}` pairs into fully qualified
//! `element.categoryOptionCombo` pairs by reconciling the category structures
//! of both instances, and keeps the persisted mapping table per
//! configuration.
//!
//! The persisted table only grows: new entries are merged into what is
//! already stored, never written over it.

pub mod expansion;
pub mod reconcile;

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::constants::limits;
use crate::error::MigratorResult;
use crate::models::{merge_mappings, DataItemMapping};
use crate::remote::{Datastore, RemoteApi};

pub use expansion::{expand_element, ComboCandidate};
pub use reconcile::reconcile;

/// Expands mappings against one source/destination pair
#[derive(Debug, Clone)]
pub struct MappingEngine {
    source: Arc<dyn RemoteApi>,
    destination: Arc<dyn RemoteApi>,
    timeout: Duration,
    concurrency: usize,
}

impl MappingEngine {
    pub fn new(
        source: Arc<dyn RemoteApi>,
        destination: Arc<dyn RemoteApi>,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            destination,
            timeout,
            concurrency: limits::METADATA_FETCH_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fully qualified mappings for one declared pair
    ///
    /// Qualified pairs pass through. When either side cannot be expanded
    /// (an indicator, or an element missing on that instance) the declared
    /// pair is kept as-is.
    pub async fn expand_pair(&self, mapping: &DataItemMapping) -> MigratorResult<Vec<DataItemMapping>> {
        if mapping.is_fully_qualified() {
            return Ok(vec![mapping.clone()]);
        }

        let destination = expand_element(
            self.destination.as_ref(),
            &mapping.id,
            self.timeout,
            self.concurrency,
        )
        .await?;
        let source = expand_element(
            self.source.as_ref(),
            &mapping.source_id,
            self.timeout,
            self.concurrency,
        )
        .await?;
        if destination.is_empty() || source.is_empty() {
            debug!(id = %mapping.id, source_id = %mapping.source_id, "Mapping kept unexpanded");
            return Ok(vec![mapping.clone()]);
        }
        Ok(reconcile(&destination, &source))
    }

    /// Expand every pair; output keeps declaration order and has no duplicates
    #[instrument(skip(self, mappings), fields(count = mappings.len()))]
    pub async fn process_data_items(
        &self,
        mappings: &[DataItemMapping],
    ) -> MigratorResult<Vec<DataItemMapping>> {
        let expanded: Vec<MigratorResult<Vec<DataItemMapping>>> = stream::iter(mappings)
            .map(|mapping| self.expand_pair(mapping))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut result = Vec::new();
        for pairs in expanded {
            result = merge_mappings(result, pairs?);
        }
        Ok(result)
    }
}

/// `processDataItems(mappings, source, destination, timeout)`
pub async fn process_data_items(
    mappings: &[DataItemMapping],
    source: Arc<dyn RemoteApi>,
    destination: Arc<dyn RemoteApi>,
    timeout: Duration,
) -> MigratorResult<Vec<DataItemMapping>> {
    MappingEngine::new(source, destination, timeout)
        .process_data_items(mappings)
        .await
}

/// Persisted mapping tables, one key per configuration
#[derive(Debug, Clone)]
pub struct MappingStore {
    store: Datastore,
    namespace: String,
}

impl MappingStore {
    pub fn new(store: Datastore, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Stored table, empty when none was written yet
    pub async fn load(&self, config_id: &str) -> MigratorResult<Vec<DataItemMapping>> {
        Ok(self
            .store
            .get_as::<Vec<DataItemMapping>>(&self.namespace, config_id)
            .await?
            .unwrap_or_default())
    }

    /// Merge `incoming` into the stored table and write it back
    pub async fn append(
        &self,
        config_id: &str,
        incoming: Vec<DataItemMapping>,
    ) -> MigratorResult<Vec<DataItemMapping>> {
        let existing = self.load(config_id).await?;
        let before = existing.len();
        let merged = merge_mappings(existing, incoming);
        self.store.put_as(&self.namespace, config_id, &merged).await?;
        info!(
            config_id = %config_id,
            added = merged.len() - before,
            total = merged.len(),
            "Stored data item mappings"
        );
        Ok(merged)
    }
}

/// Expand `mappings` and merge them into the table stored for `config_id`
pub async fn generate_and_store_mappings(
    config_id: &str,
    mappings: &[DataItemMapping],
    engine: &MappingEngine,
    store: &MappingStore,
) -> MigratorResult<Vec<DataItemMapping>> {
    let expanded = engine.process_data_items(mappings).await?;
    store.append(config_id, expanded).await
}
