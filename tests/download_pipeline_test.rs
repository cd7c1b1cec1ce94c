//! # Download Pipeline Tests
//!
//! Job expansion, dimension pagination, fetch/store/hand-off and upload,
//! against fake analytics instances and the in-memory broker.

mod common;

use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use common::{item, migration_config, Harness};
use migrator_core::constants::QueueType;
use migrator_core::download::{
    initialize_data_download, DataDownloadRequest, DataLane, DataWorker, DataWorkerConfig,
    DownloadExecutor, DownloadOutcome, JobRoute, UploadExecutor, WorkerOutcome,
};
use migrator_core::error::MigratorError;
use migrator_core::messaging::topology::{legacy_download_queue, legacy_upload_queue};
use migrator_core::messaging::topology::legacy_dead_letter_queue;
use migrator_core::messaging::{
    queue_names, DataDownloadJob, DataUploadJob, Job, MessageHeaders, MessagingService,
};
use migrator_core::models::{DataItemMapping, ItemConfig, ProcessStatus, ProcessType, RuntimeConfig};
use migrator_core::remote::RemoteError;
use migrator_core::test_helpers::Method;

fn runtime(periods: &[&str], page_size: usize) -> RuntimeConfig {
    RuntimeConfig {
        periods: periods.iter().map(|p| p.to_string()).collect(),
        page_size,
        timeout: 5_000,
        paginate_by_data: false,
    }
}

fn data_items(n: usize) -> Vec<DataItemMapping> {
    (0..n)
        .map(|i| DataItemMapping::new(format!("dst{i}"), format!("src{i}")))
        .collect()
}

fn download_job(item_config: ItemConfig, runtime_config: RuntimeConfig) -> DataDownloadJob {
    DataDownloadJob {
        job_id: Some(Uuid::new_v4()),
        main_config_id: "cfg1".to_string(),
        main_config: migration_config("cfg1", vec![item_config.clone()]),
        period_id: "202401".to_string(),
        item_config,
        runtime_config,
        override_dimensions: None,
    }
}

fn analytics_rows(rows: &[[&str; 4]]) -> Value {
    json!({
        "headers": [{"name": "dx"}, {"name": "pe"}, {"name": "ou"}, {"name": "value"}],
        "rows": rows,
    })
}

async fn prepared() -> Harness {
    let harness = Harness::new();
    harness
        .context
        .topology()
        .create_queues_for_config("cfg1")
        .await
        .unwrap();
    harness
}

#[tokio::test]
async fn test_initialize_enqueues_one_job_per_period_and_item() {
    let harness = Harness::new();
    harness.seed_config(&migration_config(
        "cfg1",
        vec![
            item("anc", data_items(2), &["ou1"]),
            item("imm", data_items(1), &["ou1", "ou2"]),
        ],
    ));

    let summary = initialize_data_download(
        &harness.context,
        DataDownloadRequest {
            main_config_id: "cfg1".to_string(),
            data_items_config_ids: Vec::new(),
            runtime_config: runtime(&["202401", "202402", "202403"], 50),
        },
    )
    .await
    .unwrap();

    assert_eq!(summary.items, 2);
    assert_eq!(summary.periods, 3);
    assert_eq!(summary.jobs_enqueued, 6);

    let jobs = harness
        .messaging
        .peek_messages(&legacy_download_queue("cfg1"))
        .await;
    assert_eq!(jobs.len(), 6);
    assert!(jobs.iter().all(|job| job.payload["mainConfigId"] == "cfg1"));
    assert!(harness.messaging.has_queue(&legacy_upload_queue("cfg1")).await);

    // Elements unknown on both instances keep their declared pairing
    let first: DataDownloadJob = serde_json::from_value(jobs[0].payload.clone()).unwrap();
    assert_eq!(first.item_config.data_items, first.main_config.items_config[0].data_items);
}

#[tokio::test]
async fn test_initialize_selects_requested_items() {
    let harness = Harness::new();
    harness.seed_config(&migration_config(
        "cfg1",
        vec![item("anc", vec![], &["ou1"]), item("imm", vec![], &["ou1"])],
    ));

    let summary = initialize_data_download(
        &harness.context,
        DataDownloadRequest {
            main_config_id: "cfg1".to_string(),
            data_items_config_ids: vec!["imm".to_string()],
            runtime_config: runtime(&["202401"], 50),
        },
    )
    .await
    .unwrap();

    assert_eq!(summary.jobs_enqueued, 1);
    let jobs = harness
        .messaging
        .peek_messages(&legacy_download_queue("cfg1"))
        .await;
    assert_eq!(jobs[0].payload["itemConfig"]["id"], "imm");
}

#[tokio::test]
async fn test_initialize_unknown_config_fails() {
    let harness = Harness::new();
    let err = initialize_data_download(
        &harness.context,
        DataDownloadRequest {
            main_config_id: "missing".to_string(),
            data_items_config_ids: Vec::new(),
            runtime_config: runtime(&["202401"], 50),
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, MigratorError::ConfigNotFound { .. }));
    assert!(harness.messaging.queue_names().await.is_empty());
}

#[tokio::test]
async fn test_oversized_job_partitions_once() {
    let harness = prepared().await;
    harness
        .source
        .set_resource("api/analytics", analytics_rows(&[["src0", "202401", "ou1", "4"]]));
    let executor = DownloadExecutor::new(Arc::clone(&harness.context));
    let parent = download_job(item("anc", data_items(7), &["ou1"]), runtime(&["202401"], 3));

    let outcome = executor.execute(&parent, JobRoute::Topology).await.unwrap();
    assert_eq!(outcome, DownloadOutcome::Partitioned { children: 3 });
    assert!(harness.source.calls_to(Method::Get, "api/analytics").is_empty());

    let set = queue_names("cfg1");
    let queued = harness.messaging.peek_messages(&set.data_download).await;
    assert_eq!(queued.len(), 3);

    let mut covered = Vec::new();
    for message in &queued {
        let Job::DataDownload(child) = Job::decode(QueueType::DataDownload, &message.payload).unwrap()
        else {
            panic!("expected a data download job");
        };
        let overrides = child.override_dimensions.clone().expect("child carries its partition");
        let dx = overrides.get("dx").unwrap().to_vec();
        assert!(dx.len() <= 3);
        covered.extend(dx);

        // A child fetches directly, it never splits again
        let outcome = executor.execute(&child, JobRoute::Topology).await.unwrap();
        assert!(matches!(outcome, DownloadOutcome::Stored { .. }));
    }
    covered.sort();
    let mut expected: Vec<String> = (0..7).map(|i| format!("src{i}")).collect();
    expected.sort();
    assert_eq!(covered, expected);
    assert_eq!(harness.source.calls_to(Method::Get, "api/analytics").len(), 3);
}

#[tokio::test]
async fn test_fetch_stores_and_queues_upload() {
    let harness = prepared().await;
    harness.source.set_resource(
        "api/analytics",
        analytics_rows(&[
            ["src0", "202401", "ou1", "4"],
            ["src1", "202401", "ou1", "9"],
        ]),
    );
    let executor = DownloadExecutor::new(Arc::clone(&harness.context));
    let job = download_job(item("anc", data_items(2), &["ou1"]), runtime(&["202401"], 50));

    let outcome = executor.execute(&job, JobRoute::Topology).await.unwrap();
    let DownloadOutcome::Stored { filename, count } = outcome else {
        panic!("expected a stored download, got {outcome:?}");
    };
    assert_eq!(count, 2);

    let stored = harness
        .context
        .storage()
        .load("cfg1", &filename)
        .await
        .unwrap();
    assert_eq!(stored["dataValues"][0]["dataElement"], "dst0");
    assert_eq!(stored["dataValues"][1]["value"], "9");

    let uploads = harness
        .messaging
        .peek_messages(&queue_names("cfg1").data_upload)
        .await;
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].payload["filename"], filename.as_str());

    let records = harness.tracker.records("cfg1", ProcessType::Download);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ProcessStatus::Success);
    assert_eq!(records[0].count, Some(2));
}

#[tokio::test]
async fn test_empty_result_records_no_data() {
    let harness = prepared().await;
    harness
        .source
        .set_resource("api/analytics", json!({"headers": [{"name": "dx"}], "rows": []}));
    let executor = DownloadExecutor::new(Arc::clone(&harness.context));
    let job = download_job(item("anc", data_items(1), &["ou1"]), runtime(&["202401"], 50));

    let outcome = executor.execute(&job, JobRoute::Legacy).await.unwrap();

    assert_eq!(outcome, DownloadOutcome::NoData);
    let records = harness.tracker.records("cfg1", ProcessType::Download);
    assert_eq!(records[0].status, ProcessStatus::NoData);
    assert_eq!(records[0].period.as_deref(), Some("202401"));
    assert_eq!(harness.messaging.queue_length(&legacy_upload_queue("cfg1")).await, 0);
}

#[tokio::test]
async fn test_fetch_failure_is_recorded_and_retryable() {
    let harness = prepared().await;
    harness.source.fail_next(
        "api/analytics",
        RemoteError::status_error(502, "https://source.test/api/analytics", None),
    );
    let executor = DownloadExecutor::new(Arc::clone(&harness.context));
    let job = download_job(item("anc", data_items(1), &["ou1"]), runtime(&["202401"], 50));

    let err = executor.execute(&job, JobRoute::Topology).await.unwrap_err();

    assert!(err.is_retryable());
    let records = harness.tracker.records("cfg1", ProcessType::Download);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ProcessStatus::Failed);
}

#[tokio::test]
async fn test_upload_posts_and_removes_payload() {
    let harness = prepared().await;
    harness.seed_config(&migration_config("cfg1", vec![]));
    harness.destination.set_post_response(
        "api/dataValueSets",
        json!({"status": "SUCCESS", "importCount": {"imported": 1}}),
    );
    let storage = harness.context.storage();
    let filename = storage
        .store("cfg1", &json!({"dataValues": [{"dataElement": "de", "value": "1"}]}))
        .await
        .unwrap();

    let outcome = UploadExecutor::new(Arc::clone(&harness.context))
        .upload(&DataUploadJob {
            main_config_id: "cfg1".to_string(),
            filename: filename.clone(),
            period_id: Some("202401".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(outcome.import_summary["importCount"]["imported"], 1);
    let posts = harness.destination.calls_to(Method::Post, "api/dataValueSets");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].query_value("importStrategy"), Some("CREATE_AND_UPDATE"));
    assert!(storage.load("cfg1", &filename).await.is_err());

    let records = harness.tracker.records("cfg1", ProcessType::Upload);
    assert_eq!(records[0].status, ProcessStatus::Success);
}

#[tokio::test]
async fn test_failed_upload_keeps_payload() {
    let harness = prepared().await;
    harness.seed_config(&migration_config("cfg1", vec![]));
    harness.destination.fail_next(
        "api/dataValueSets",
        RemoteError::status_error(409, "https://destination.test/api/dataValueSets", Some(json!({"status": "ERROR"}))),
    );
    let storage = harness.context.storage();
    let filename = storage.store("cfg1", &json!({"dataValues": []})).await.unwrap();

    let err = UploadExecutor::new(Arc::clone(&harness.context))
        .upload(&DataUploadJob {
            main_config_id: "cfg1".to_string(),
            filename: filename.clone(),
            period_id: None,
        })
        .await
        .unwrap_err();

    assert!(!err.is_retryable());
    assert!(storage.load("cfg1", &filename).await.is_ok());
    let records = harness.tracker.records("cfg1", ProcessType::Upload);
    assert_eq!(records[0].status, ProcessStatus::Failed);
    assert_eq!(records[0].remote_error, Some(json!({"status": "ERROR"})));
}

#[tokio::test]
async fn test_worker_requeues_then_discards_to_dead_letter() {
    let harness = Harness::new();
    harness.seed_config(&migration_config("cfg1", vec![item("anc", data_items(1), &["ou1"])]));
    initialize_data_download(
        &harness.context,
        DataDownloadRequest {
            main_config_id: "cfg1".to_string(),
            data_items_config_ids: Vec::new(),
            runtime_config: runtime(&["202401"], 50),
        },
    )
    .await
    .unwrap();
    harness.source.fail_times("api/analytics", 3, || {
        RemoteError::status_error(502, "https://source.test/api/analytics", None)
    });

    let messaging: Arc<dyn MessagingService> = harness.messaging.clone();
    let worker = DataWorker::new(
        Arc::clone(&harness.context),
        messaging,
        DataWorkerConfig {
            max_job_retries: 2,
            ..DataWorkerConfig::default()
        },
    );
    let queue = DataLane::Download.queue_for("cfg1");

    let mut outcomes = Vec::new();
    while let Some(outcome) = worker.process_once(DataLane::Download, &queue).await.unwrap() {
        outcomes.push(outcome);
    }

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0], WorkerOutcome::Requeued { attempt: 1 });
    assert_eq!(outcomes[1], WorkerOutcome::Requeued { attempt: 2 });
    assert!(matches!(outcomes[2], WorkerOutcome::Discarded { .. }));

    let stats = worker.stats(DataLane::Download);
    assert_eq!(stats.get_requeued(), 2);
    assert_eq!(stats.get_discarded(), 1);
    assert_eq!(
        harness
            .messaging
            .queue_length(&legacy_dead_letter_queue(&queue))
            .await,
        1
    );
}

#[tokio::test]
async fn test_worker_caps_retries_for_jobs_without_job_id() {
    let harness = Harness::new();
    let (queue, _) = harness
        .context
        .topology()
        .assert_legacy_queues("cfg1")
        .await
        .unwrap();
    let body = json!({
        "mainConfigId": "cfg1",
        "mainConfig": migration_config("cfg1", vec![]),
        "periodId": "202401",
        "itemConfig": item("anc", data_items(1), &["ou1"]),
        "runtimeConfig": {"periods": ["202401"], "pageSize": 50, "timeout": 5000}
    });
    harness
        .context
        .publisher()
        .publish_value(&queue, &body, &MessageHeaders::new())
        .await
        .unwrap();
    harness.source.fail_times("api/analytics", 10, || {
        RemoteError::status_error(502, "https://source.test/api/analytics", None)
    });

    let messaging: Arc<dyn MessagingService> = harness.messaging.clone();
    let worker = DataWorker::new(Arc::clone(&harness.context), messaging, DataWorkerConfig::default());

    let mut outcomes = Vec::new();
    while let Some(outcome) = worker.process_once(DataLane::Download, &queue).await.unwrap() {
        outcomes.push(outcome);
        assert!(outcomes.len() <= 3, "job kept being requeued: {outcomes:?}");
    }

    assert_eq!(
        &outcomes[..2],
        &[
            WorkerOutcome::Requeued { attempt: 1 },
            WorkerOutcome::Requeued { attempt: 2 },
        ]
    );
    assert!(matches!(outcomes[2], WorkerOutcome::Discarded { .. }));
    assert_eq!(
        harness
            .messaging
            .queue_length(&legacy_dead_letter_queue(&queue))
            .await,
        1
    );
}
