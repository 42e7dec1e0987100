//! Integration tests for the job queue registry.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use learnhub_broker::{BrokerClient, EnqueueOptions, JobProcessor, MemoryBroker};
use learnhub_core::config::queue::QueueConfig;
use learnhub_core::error::ErrorKind;
use learnhub_entity::job::{JobStatus, JobType, JobTypeOverrides};
use learnhub_worker::{JobQueueRegistry, QueueAction};

use crate::helpers::{
    fast_worker_config, wait_until, FlakyProcessor, FlakyRetryBroker, PayloadDrivenProcessor,
    TestHarness,
};

fn quick_retry_overrides() -> JobTypeOverrides {
    JobTypeOverrides {
        max_retries: Some(1),
        backoff_delay_ms: Some(10),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_queue_is_idempotent() {
    let harness = TestHarness::new();

    let first = harness
        .registry
        .create_queue(JobType::QuizExport, None)
        .await
        .unwrap();
    let second = harness
        .registry
        .create_queue(
            JobType::QuizExport,
            Some(JobTypeOverrides {
                concurrency: Some(9),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    // Overrides only apply on first creation.
    assert_eq!(second.config().concurrency, 2);
}

#[tokio::test]
async fn test_second_worker_for_same_queue_is_rejected() {
    let harness = TestHarness::new();
    let processor = || Arc::new(PayloadDrivenProcessor) as Arc<dyn JobProcessor>;

    harness
        .registry
        .create_worker(JobType::Email, processor(), None)
        .await
        .unwrap();
    let err = harness
        .registry
        .create_worker(JobType::Email, processor(), None)
        .await
        .unwrap_err();

    assert!(err.is_kind(ErrorKind::DuplicateRegistration));
    assert_eq!(harness.registry.worker_count(), 1);
}

#[tokio::test]
async fn test_manage_unknown_queue_is_not_found() {
    let harness = TestHarness::new();
    let err = harness
        .registry
        .manage_queue("learnhub:unknown", QueueAction::Pause, None)
        .await
        .unwrap_err();
    assert!(err.is_kind(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_get_job_details_for_missing_job() {
    let harness = TestHarness::new();
    let queue = harness
        .registry
        .create_queue(JobType::QuizExport, None)
        .await
        .unwrap();

    let missing = Uuid::new_v4();
    let err = harness
        .registry
        .get_job_details(queue.name(), missing)
        .await
        .unwrap_err();

    assert!(err.is_kind(ErrorKind::NotFound));
    assert!(err.message.contains(&missing.to_string()));
}

#[tokio::test]
async fn test_clear_completed_preserves_other_statuses() {
    let harness = TestHarness::new();
    let queue = harness
        .registry
        .create_queue(JobType::Email, Some(quick_retry_overrides()))
        .await
        .unwrap();
    harness
        .registry
        .create_worker(JobType::Email, Arc::new(PayloadDrivenProcessor), None)
        .await
        .unwrap();

    for _ in 0..2 {
        queue
            .enqueue_raw(
                "email",
                serde_json::json!({ "fail": false }),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();
    }
    queue
        .enqueue_raw(
            "email",
            serde_json::json!({ "fail": true }),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    let broker = Arc::clone(&harness.broker);
    let name = queue.name().to_string();
    wait_until(
        || {
            let broker = Arc::clone(&broker);
            let name = name.clone();
            async move {
                let counts = broker.get_counts(&name).await.unwrap();
                counts.completed == 2 && counts.failed == 1
            }
        },
        Duration::from_secs(5),
    )
    .await;

    // Park two more jobs behind a paused queue so non-completed counts
    // have something to preserve.
    harness
        .registry
        .manage_queue(queue.name(), QueueAction::Pause, None)
        .await
        .unwrap();
    for _ in 0..2 {
        queue
            .enqueue_raw(
                "email",
                serde_json::json!({ "fail": false }),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();
    }

    let report = harness
        .registry
        .manage_queue(queue.name(), QueueAction::Clear, Some(JobStatus::Completed))
        .await
        .unwrap();
    assert!(report.success);

    let counts = harness.broker.get_counts(queue.name()).await.unwrap();
    assert_eq!(counts.completed, 0);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.paused, 2);
}

#[tokio::test]
async fn test_bulk_retry_counts_only_successes() {
    let inner = MemoryBroker::new(&fast_worker_config());
    let flaky = Arc::new(FlakyRetryBroker::new(inner));
    let registry = Arc::new(JobQueueRegistry::new(
        Arc::clone(&flaky) as Arc<dyn BrokerClient>,
        QueueConfig::default(),
    ));

    let queue = registry
        .create_queue(JobType::Email, Some(quick_retry_overrides()))
        .await
        .unwrap();
    registry
        .create_worker(JobType::Email, Arc::new(FlakyProcessor::always_failing()), None)
        .await
        .unwrap();

    let mut job_ids = Vec::new();
    for _ in 0..3 {
        job_ids.push(
            queue
                .enqueue_raw("email", serde_json::json!({}), EnqueueOptions::default())
                .await
                .unwrap(),
        );
    }

    let stats_broker = Arc::clone(&flaky);
    let name = queue.name().to_string();
    wait_until(
        || {
            let broker = Arc::clone(&stats_broker);
            let name = name.clone();
            async move { broker.get_counts(&name).await.unwrap().failed == 3 }
        },
        Duration::from_secs(5),
    )
    .await;

    // One of the three retries is rejected by the broker; the bulk call
    // still succeeds and reports the other two.
    flaky.poison(job_ids[0]);
    let report = registry
        .retry_failed_jobs(queue.name(), None)
        .await
        .unwrap();
    assert_eq!(report.retried_count, 2);
}

#[tokio::test]
async fn test_single_retry_of_non_failed_job_is_a_noop() {
    let harness = TestHarness::new();
    let queue = harness
        .registry
        .create_queue(JobType::Email, None)
        .await
        .unwrap();

    // No worker bound: the job stays waiting.
    let job_id = queue
        .enqueue_raw("email", serde_json::json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    let report = harness
        .registry
        .retry_failed_jobs(queue.name(), Some(job_id))
        .await
        .unwrap();
    assert_eq!(report.retried_count, 0);

    let job = harness
        .registry
        .get_job_details(queue.name(), job_id)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
}

#[tokio::test]
async fn test_single_retry_of_missing_job_is_not_found() {
    let harness = TestHarness::new();
    let queue = harness
        .registry
        .create_queue(JobType::Email, None)
        .await
        .unwrap();

    let err = harness
        .registry
        .retry_failed_jobs(queue.name(), Some(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(err.is_kind(ErrorKind::NotFound));

    let err = harness
        .registry
        .retry_failed_jobs("learnhub:unknown", None)
        .await
        .unwrap_err();
    assert!(err.is_kind(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_stats_cover_every_known_queue() {
    let harness = TestHarness::new();
    let email = harness
        .registry
        .create_queue(JobType::Email, None)
        .await
        .unwrap();
    harness
        .registry
        .create_queue(JobType::QuizExport, None)
        .await
        .unwrap();

    email
        .enqueue_raw("email", serde_json::json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    let stats = harness.registry.get_all_queue_stats().await;
    assert_eq!(stats.len(), 2);
    let email_row = stats.iter().find(|row| row.name == email.name()).unwrap();
    assert_eq!(email_row.counts.waiting, 1);
}

#[tokio::test]
async fn test_shutdown_closes_everything_and_clears_maps() {
    let harness = TestHarness::new();
    let email = harness
        .registry
        .create_queue(JobType::Email, None)
        .await
        .unwrap();
    harness
        .registry
        .create_queue(JobType::QuizExport, None)
        .await
        .unwrap();
    harness
        .registry
        .create_worker(JobType::Email, Arc::new(PayloadDrivenProcessor), None)
        .await
        .unwrap();

    harness.registry.shutdown().await;

    assert_eq!(harness.registry.queue_count(), 0);
    assert_eq!(harness.registry.worker_count(), 0);
    // Queues were actually closed in the broker, not just forgotten.
    let err = harness.broker.get_counts(email.name()).await.unwrap_err();
    assert!(err.is_kind(ErrorKind::NotFound));
}
