//! # Consumer Dispatcher Tests
//!
//! Retry, dead-letter and failed-queue routing for one delivery at a time,
//! driven through `poll_once` against the in-memory broker.

mod common;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::Harness;
use migrator_core::constants::{headers, QueueType};
use migrator_core::error::{MigratorError, MigratorResult};
use migrator_core::messaging::{
    queue_names, ConsumerDispatcher, DeliveryOutcome, DispatcherConfig, Job, JobHandler,
    MessageHeaders, MessagingService, MetadataDownloadJob, RetryContext,
};
use migrator_core::remote::RemoteError;

#[derive(Debug)]
enum Behaviour {
    Succeed,
    FailTransiently,
    FailPermanently,
}

#[derive(Debug)]
struct ScriptedHandler {
    behaviour: Behaviour,
    invocations: AtomicUsize,
    seen_retry_counts: Mutex<Vec<u32>>,
}

impl ScriptedHandler {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            invocations: AtomicUsize::new(0),
            seen_retry_counts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl JobHandler for ScriptedHandler {
    async fn handle(&self, _job: Job, retry: &RetryContext) -> MigratorResult<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.seen_retry_counts.lock().push(retry.count);
        match self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::FailTransiently => Err(RemoteError::status_error(
                503,
                "https://source.test/api/analytics",
                Some(json!({"message": "unavailable"})),
            )
            .into()),
            Behaviour::FailPermanently => Err(MigratorError::malformed("missing periodId")),
        }
    }
}

async fn dispatcher_with(harness: &Harness, handler: Arc<ScriptedHandler>) -> ConsumerDispatcher {
    harness
        .context
        .topology()
        .create_queues_for_config("cfg1")
        .await
        .unwrap();
    ConsumerDispatcher::new(
        harness.messaging.clone(),
        Arc::clone(harness.context.topology()),
        handler,
        DispatcherConfig::default(),
    )
}

async fn publish_metadata_download(harness: &Harness) {
    harness
        .context
        .publisher()
        .push_job(&Job::MetadataDownload(MetadataDownloadJob {
            config_id: "cfg1".to_string(),
        }))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_success_acknowledges() {
    let harness = Harness::new();
    let handler = ScriptedHandler::new(Behaviour::Succeed);
    let dispatcher = dispatcher_with(&harness, handler.clone()).await;
    publish_metadata_download(&harness).await;

    let queue = queue_names("cfg1").metadata_download;
    let outcome = dispatcher
        .poll_once(QueueType::MetadataDownload, &queue)
        .await
        .unwrap();

    assert_eq!(outcome, Some(DeliveryOutcome::Acked));
    assert_eq!(dispatcher.stats().get_processed(), 1);
    let stats = harness.messaging.queue_stats(&queue).await.unwrap();
    assert_eq!(stats.ready, 0);
    assert_eq!(stats.unacked, 0);
}

#[tokio::test]
async fn test_retry_cap_dead_letters_after_three_republishes() {
    let harness = Harness::new();
    let handler = ScriptedHandler::new(Behaviour::FailTransiently);
    let dispatcher = dispatcher_with(&harness, handler.clone()).await;
    publish_metadata_download(&harness).await;

    let set = queue_names("cfg1");
    let mut outcomes = Vec::new();
    while let Some(outcome) = dispatcher
        .poll_once(QueueType::MetadataDownload, &set.metadata_download)
        .await
        .unwrap()
    {
        outcomes.push(outcome);
    }

    assert_eq!(handler.invocations.load(Ordering::SeqCst), 4);
    assert_eq!(*handler.seen_retry_counts.lock(), vec![0, 1, 2, 3]);
    let retry_counts: Vec<u32> = outcomes
        .iter()
        .filter_map(|o| match o {
            DeliveryOutcome::Retried { retry_count, .. } => Some(*retry_count),
            _ => None,
        })
        .collect();
    assert_eq!(retry_counts, vec![1, 2, 3]);
    assert!(matches!(outcomes.last(), Some(DeliveryOutcome::DeadLettered { .. })));

    // The broker routes the final rejection to the failed queue
    let dead = harness.messaging.peek_messages(&set.failed).await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].payload["configId"], "cfg1");
    let last = RetryContext::from_headers(&dead[0].headers);
    assert_eq!(last.count, 3);
    assert_eq!(last.last_error.and_then(|f| f.http_status), Some(503));
    assert_eq!(dispatcher.stats().get_retried(), 3);
    assert_eq!(dispatcher.stats().get_dead_lettered(), 1);
}

#[tokio::test]
async fn test_retry_headers_carry_diagnostics() {
    let harness = Harness::new();
    let handler = ScriptedHandler::new(Behaviour::FailTransiently);
    let dispatcher = dispatcher_with(&harness, handler).await;
    publish_metadata_download(&harness).await;

    let queue = queue_names("cfg1").metadata_download;
    dispatcher
        .poll_once(QueueType::MetadataDownload, &queue)
        .await
        .unwrap();

    let republished = harness.messaging.peek_messages(&queue).await;
    assert_eq!(republished.len(), 1);
    let received = &republished[0].headers;
    for name in [
        headers::RETRY_COUNT,
        headers::FAILURE_REASON,
        headers::ERROR_MESSAGE,
        headers::ERROR_NAME,
        headers::QUEUE_TYPE,
    ] {
        assert!(received.contains_key(name), "missing header {name}");
    }
}

#[tokio::test]
async fn test_non_retryable_failure_goes_to_failed_queue() {
    let harness = Harness::new();
    let handler = ScriptedHandler::new(Behaviour::FailPermanently);
    let dispatcher = dispatcher_with(&harness, handler.clone()).await;
    publish_metadata_download(&harness).await;

    let set = queue_names("cfg1");
    let outcome = dispatcher
        .poll_once(QueueType::MetadataDownload, &set.metadata_download)
        .await
        .unwrap();

    assert_eq!(outcome, Some(DeliveryOutcome::SentToFailedQueue));
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 1);
    let failed = harness.messaging.peek_messages(&set.failed).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].payload["operation"], "metadata-download");
    assert_eq!(failed[0].payload["queueType"], "failed");
    assert_eq!(failed[0].payload["error"]["name"], "MalformedJob");
    assert_eq!(harness.messaging.queue_length(&set.metadata_download).await, 0);
}

#[tokio::test]
async fn test_message_without_config_id_is_dead_lettered() {
    let harness = Harness::new();
    let handler = ScriptedHandler::new(Behaviour::Succeed);
    let dispatcher = dispatcher_with(&harness, handler.clone()).await;

    let set = queue_names("cfg1");
    harness
        .messaging
        .publish(
            &set.data_upload,
            br#"{"filename":"x.json"}"#,
            &MessageHeaders::new(),
        )
        .await
        .unwrap();

    let outcome = dispatcher
        .poll_once(QueueType::DataUpload, &set.data_upload)
        .await
        .unwrap();

    assert!(matches!(outcome, Some(DeliveryOutcome::DeadLettered { .. })));
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 0);
    assert_eq!(harness.messaging.queue_length(&set.failed).await, 1);
}

#[tokio::test]
async fn test_discovery_covers_every_work_queue() {
    let harness = Harness::new();
    harness.seed_config(&common::migration_config("cfg1", vec![]));
    harness.seed_config(&common::migration_config("cfg2", vec![]));
    let dispatcher = ConsumerDispatcher::new(
        harness.messaging.clone(),
        Arc::clone(harness.context.topology()),
        ScriptedHandler::new(Behaviour::Succeed),
        DispatcherConfig::default(),
    );

    let queues = dispatcher.discover().await.unwrap();
    assert_eq!(queues.len(), 10);
    assert!(queues.iter().all(|(queue_type, _)| *queue_type != QueueType::Failed));
    assert!(harness.messaging.has_queue("cfg2-failed-queue").await);
}
