//! # Queue Topology Tests
//!
//! Queue set creation, batch isolation of purge/delete, and initialization
//! from the external store, against the in-memory broker.

mod common;

use common::{migration_config, Harness};
use migrator_core::constants::QueueType;
use migrator_core::error::MigratorError;
use migrator_core::messaging::{queue_names, MessagingService, QueueOpOutcome, QueueOptions};

#[tokio::test]
async fn test_create_queues_twice_is_idempotent() {
    let harness = Harness::new();
    let topology = harness.context.topology();

    let first = topology.create_queues_for_config("cfg1").await.unwrap();
    let queues_after_first = harness.messaging.queue_names().await;
    let second = topology.create_queues_for_config("cfg1").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.messaging.queue_names().await, queues_after_first);
    assert_eq!(queues_after_first.len(), 6);

    let set = queue_names("cfg1");
    assert_eq!(set.failed, "cfg1-failed-queue");
    assert_eq!(
        harness.messaging.queue_options(&set.failed).await,
        Some(QueueOptions::durable())
    );
    for (_, queue) in set.work_queues() {
        let options = harness.messaging.queue_options(queue).await.unwrap();
        assert_eq!(options.dead_letter_routing_key.as_deref(), Some("cfg1-failed-queue"));
    }
}

#[tokio::test]
async fn test_create_queues_notifies_consumers() {
    let harness = Harness::new();
    let topology = harness.context.topology();
    let mut events = topology.subscribe();

    topology.create_queues_for_config("cfg1").await.unwrap();

    assert!(events.try_recv().is_ok());
}

#[tokio::test]
async fn test_purge_isolates_missing_queue() {
    let harness = Harness::new();
    let topology = harness.context.topology();
    topology.create_queues_for_config("cfg1").await.unwrap();

    let missing = queue_names("cfg1").get(QueueType::DataDeletion).to_string();
    harness.messaging.delete_queue(&missing).await.unwrap();

    let report = topology.purge_config_queues("cfg1").await;
    assert_eq!(report.results.len(), 6);
    assert_eq!(report.succeeded(), 5);
    assert_eq!(report.failed(), 1);
    assert!(matches!(
        report.results.get(&missing),
        Some(QueueOpOutcome::Failed { .. })
    ));
}

#[tokio::test]
async fn test_delete_removes_every_queue() {
    let harness = Harness::new();
    let topology = harness.context.topology();
    topology.create_queues_for_config("cfg1").await.unwrap();

    let report = topology.delete_config_queues("cfg1").await;
    assert_eq!(report.succeeded(), 6);
    assert!(harness.messaging.queue_names().await.is_empty());

    let again = topology.delete_config_queues("cfg1").await;
    assert_eq!(again.failed(), 6);
}

#[tokio::test]
async fn test_initialize_from_datastore_requires_config() {
    let harness = Harness::new();
    let topology = harness.context.topology();

    let err = topology
        .initialize_queues_from_datastore("absent")
        .await
        .unwrap_err();
    assert!(matches!(err, MigratorError::ConfigNotFound { .. }));
    assert!(harness.messaging.queue_names().await.is_empty());

    harness.seed_config(&migration_config("present", vec![]));
    let set = topology
        .initialize_queues_from_datastore("present")
        .await
        .unwrap();
    assert!(harness.messaging.has_queue(&set.failed).await);
}

#[tokio::test]
async fn test_initialize_all_isolates_failures() {
    let harness = Harness::new();
    harness.seed_config(&migration_config("good", vec![]));
    harness.seed_config(&migration_config("bad", vec![]));

    // An inequivalent pre-existing declaration makes "bad" fail
    harness
        .messaging
        .declare_queue("bad-failed-queue", &QueueOptions::dead_lettered_to("elsewhere"))
        .await
        .unwrap();

    let summary = harness
        .context
        .topology()
        .initialize_all_queues_from_datastore()
        .await
        .unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].0, "bad");
    assert!(harness.messaging.has_queue("good-data-upload-queue").await);
}

#[tokio::test]
async fn test_verify_reports_missing_queues() {
    let harness = Harness::new();
    let topology = harness.context.topology();
    topology.create_queues_for_config("cfg1").await.unwrap();
    harness
        .messaging
        .delete_queue("cfg1-metadata-upload-queue")
        .await
        .unwrap();

    let report = topology.verify_config_queues("cfg1").await.unwrap();
    assert!(!report.is_healthy());
}
