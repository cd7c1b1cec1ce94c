//! # Identifier Mapping Tests
//!
//! Reconciliation properties and the additive mapping table, exercised
//! through the system entry point against fake instances.

mod common;

use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

use common::{migration_config, Harness};
use migrator_core::mapping::{reconcile, ComboCandidate};
use migrator_core::messaging::InMemoryMessagingService;
use migrator_core::models::DataItemMapping;
use migrator_core::system::MigrationSystem;
use migrator_core::test_helpers::FakeRemoteApi;

fn seed_element(api: &FakeRemoteApi, element: &str, combos: &[(&str, &str)]) {
    let combo_id = format!("cc-{element}");
    api.set_resource(
        &format!("api/dataElements/{element}"),
        json!({"categoryCombo": {"id": combo_id}}),
    );
    api.set_resource(
        &format!("api/categoryCombos/{combo_id}"),
        json!({"categoryOptionCombos": combos.iter().map(|(id, _)| json!({"id": id})).collect::<Vec<_>>()}),
    );
    for (id, name) in combos {
        api.set_resource(
            &format!("api/categoryOptionCombos/{id}"),
            json!({"id": id, "name": name}),
        );
    }
}

fn system(harness: &Harness) -> MigrationSystem {
    MigrationSystem::new(
        Arc::clone(&harness.context),
        Arc::new(InMemoryMessagingService::new()),
    )
}

#[tokio::test]
async fn test_generated_mappings_accumulate() {
    let harness = Harness::new();
    harness.seed_config(&migration_config("cfg1", vec![]));
    seed_element(&harness.source, "s1", &[("m", "Male"), ("f", "Female")]);
    seed_element(&harness.destination, "d1", &[("x", "Female"), ("m", "Male")]);
    let system = system(&harness);

    let first = system
        .generate_and_store_mappings("cfg1", &[DataItemMapping::new("d1", "s1")])
        .await
        .unwrap();
    assert_eq!(
        first,
        vec![
            DataItemMapping::new("d1.x", "s1.f"),
            DataItemMapping::new("d1.m", "s1.m"),
        ]
    );

    let second = system
        .generate_and_store_mappings(
            "cfg1",
            &[
                DataItemMapping::new("ind1", "ind9"),
                DataItemMapping::new("d1", "s1"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(second.len(), 3);
    assert_eq!(&second[..2], &first[..]);
    assert_eq!(second[2], DataItemMapping::new("ind1", "ind9"));

    let namespace = &harness.context.settings().store.mapping_namespace;
    let stored = harness.store.stored_value(namespace, "cfg1").unwrap();
    assert_eq!(stored.as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn test_generation_requires_config() {
    let harness = Harness::new();
    let result = system(&harness)
        .generate_and_store_mappings("absent", &[DataItemMapping::new("a", "b")])
        .await;
    assert!(result.is_err());
    assert!(harness.store.writes().is_empty());
}

fn candidates(element: &'static str) -> impl Strategy<Value = Vec<ComboCandidate>> {
    prop::collection::vec(("[a-e]", "[A-C]?"), 0..8).prop_map(move |pairs| {
        pairs
            .into_iter()
            .map(|(combo, name)| ComboCandidate::new(element, combo, name))
            .collect()
    })
}

proptest! {
    #[test]
    fn reconciled_pairs_come_from_both_sides(
        destination in candidates("d"),
        source in candidates("s"),
    ) {
        let mappings = reconcile(&destination, &source);

        let destination_ids: HashSet<String> = destination.iter().map(ComboCandidate::qualified_id).collect();
        let source_ids: HashSet<String> = source.iter().map(ComboCandidate::qualified_id).collect();
        let mut seen = HashSet::new();
        for mapping in &mappings {
            prop_assert!(destination_ids.contains(&mapping.id));
            prop_assert!(source_ids.contains(&mapping.source_id));
            prop_assert!(seen.insert(mapping.clone()));
        }
    }

    #[test]
    fn shared_combo_ids_map_to_themselves(
        destination in candidates("d"),
        source in candidates("s"),
    ) {
        let mappings = reconcile(&destination, &source);
        for dest in &destination {
            if source.iter().any(|src| src.combo == dest.combo) {
                let expected = DataItemMapping::new(dest.qualified_id(), format!("s.{}", dest.combo));
                prop_assert!(mappings.contains(&expected));
            }
        }
    }
}
