//! Portal configuration export and import.

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use crate::config::PortalConfig;
use crate::error::MigratorResult;
use crate::models::{ConfigurationExport, NamespaceExport, NamespaceImportResult};
use crate::remote::Datastore;

/// Whether a module document keeps its content in a static namespace
pub fn is_static_module(module: &Value) -> bool {
    module
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.eq_ignore_ascii_case("static"))
}

async fn export_namespace(store: &Datastore, namespace: &str) -> MigratorResult<NamespaceExport> {
    let mut entries = BTreeMap::new();
    for key in store.list_keys(namespace).await? {
        if let Some(value) = store.get(namespace, &key).await? {
            entries.insert(key, value);
        }
    }
    Ok(NamespaceExport {
        namespace: namespace.to_string(),
        entries,
    })
}

/// Read the main namespace, the modules namespace and every static module namespace
#[instrument(skip_all, fields(main = %portal.main_namespace))]
pub async fn export_configuration(
    store: &Datastore,
    portal: &PortalConfig,
) -> MigratorResult<ConfigurationExport> {
    let main = export_namespace(store, &portal.main_namespace).await?;
    let modules = export_namespace(store, &portal.modules_namespace).await?;

    let static_ids: Vec<String> = modules
        .entries
        .iter()
        .filter(|(_, module)| is_static_module(module))
        .map(|(key, module)| {
            module
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(key)
                .to_string()
        })
        .collect();

    let mut namespaces = vec![main, modules];
    for module_id in static_ids {
        namespaces.push(export_namespace(store, &portal.static_namespace(&module_id)).await?);
    }

    let export = ConfigurationExport { namespaces };
    info!(
        namespaces = export.namespaces.len(),
        keys = export.key_count(),
        "Portal configuration exported"
    );
    Ok(export)
}

/// Write every exported key, creating absent keys and updating existing ones
///
/// One failing key does not stop the rest; failures are tallied per namespace.
#[instrument(skip_all, fields(namespaces = export.namespaces.len()))]
pub async fn import_configuration(
    store: &Datastore,
    export: &ConfigurationExport,
) -> Vec<NamespaceImportResult> {
    let mut results = Vec::with_capacity(export.namespaces.len());
    for namespace in &export.namespaces {
        let mut result = NamespaceImportResult::new(&namespace.namespace);
        for (key, value) in &namespace.entries {
            let outcome = match store.exists(&namespace.namespace, key).await {
                Ok(true) => store
                    .update(&namespace.namespace, key, value)
                    .await
                    .map(|_| false),
                Ok(false) => store
                    .create(&namespace.namespace, key, value)
                    .await
                    .map(|_| true),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(true) => result.created += 1,
                Ok(false) => result.updated += 1,
                Err(e) => {
                    warn!(namespace = %namespace.namespace, key = %key, error = %e, "Key import failed");
                    result.failed += 1;
                    result.errors.push(format!("{key}: {e}"));
                }
            }
        }
        info!(
            namespace = %result.namespace,
            created = result.created,
            updated = result.updated,
            failed = result.failed,
            "Namespace imported"
        );
        results.push(result);
    }
    results
}
