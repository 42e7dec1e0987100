//! End-to-end tests of the job state machine through the registry.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use learnhub_broker::EnqueueOptions;
use learnhub_entity::job::{JobStatus, JobType, JobTypeOverrides};
use learnhub_worker::QueueEventListener;

use crate::helpers::{
    wait_for_status, wait_until, FlakyProcessor, PanicOnceProcessor, PayloadDrivenProcessor,
    RecordingListener, TestHarness,
};

#[tokio::test]
async fn test_flaky_email_retries_until_completed() {
    let harness = TestHarness::new();

    let listener = Arc::new(RecordingListener::default());
    harness.registry.register_event_listener(
        &harness.registry.queue_name(JobType::Email),
        Arc::clone(&listener) as Arc<dyn QueueEventListener>,
    );

    let queue = harness
        .registry
        .create_queue(
            JobType::Email,
            Some(JobTypeOverrides {
                backoff_delay_ms: Some(20),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
    harness
        .registry
        .create_worker(JobType::Email, Arc::new(FlakyProcessor::new(2)), None)
        .await
        .unwrap();

    let job_id = queue
        .enqueue_raw(
            "email",
            serde_json::json!({ "to": "student@example.com" }),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    wait_for_status(
        &harness.broker,
        queue.name(),
        job_id,
        JobStatus::Completed,
        Duration::from_secs(5),
    )
    .await;

    // Two transient failures plus the final success.
    let job = harness
        .registry
        .get_job_details(queue.name(), job_id)
        .await
        .unwrap();
    assert_eq!(job.attempts_made, 3);
    assert_eq!(job.progress, 100);

    // Listener saw both retrying failures and the completion.
    let check_listener = Arc::clone(&listener);
    wait_until(
        || {
            let listener = Arc::clone(&check_listener);
            async move { listener.completed.lock().unwrap().contains(&job_id) }
        },
        Duration::from_secs(5),
    )
    .await;
    let failed = listener.failed.lock().unwrap().clone();
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|(id, _, retrying)| *id == job_id && *retrying));
}

#[tokio::test]
async fn test_paused_queue_holds_jobs_until_resume() {
    let harness = TestHarness::new();
    let queue = harness
        .registry
        .create_queue(JobType::QuizExport, None)
        .await
        .unwrap();
    harness
        .registry
        .create_worker(JobType::QuizExport, Arc::new(PayloadDrivenProcessor), None)
        .await
        .unwrap();

    queue.pause().await.unwrap();
    let job_id = queue
        .enqueue_raw("quiz-export", serde_json::json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    // Give the worker ample opportunity to (incorrectly) pick it up.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let counts = queue.counts().await.unwrap();
    assert_eq!(counts.paused, 1);
    assert_eq!(counts.completed, 0);

    queue.resume().await.unwrap();
    wait_for_status(
        &harness.broker,
        queue.name(),
        job_id,
        JobStatus::Completed,
        Duration::from_secs(5),
    )
    .await;
}

#[tokio::test]
async fn test_panicked_processor_is_recovered_by_stall_detection() {
    let harness = TestHarness::new();

    let listener = Arc::new(RecordingListener::default());
    harness.registry.register_event_listener(
        &harness.registry.queue_name(JobType::VideoTranscode),
        Arc::clone(&listener) as Arc<dyn QueueEventListener>,
    );

    let queue = harness
        .registry
        .create_queue(
            JobType::VideoTranscode,
            Some(JobTypeOverrides {
                stalled_interval_ms: Some(100),
                max_stalled_count: Some(2),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
    harness
        .registry
        .create_worker(
            JobType::VideoTranscode,
            Arc::new(PanicOnceProcessor::default()),
            None,
        )
        .await
        .unwrap();

    let job_id = queue
        .enqueue_raw(
            "video-transcode",
            serde_json::json!({ "video_id": "11111111-1111-1111-1111-111111111111" }),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    wait_for_status(
        &harness.broker,
        queue.name(),
        job_id,
        JobStatus::Completed,
        Duration::from_secs(10),
    )
    .await;

    let job = harness
        .registry
        .get_job_details(queue.name(), job_id)
        .await
        .unwrap();
    assert!(job.stalled_count >= 1);
    assert!(listener.stalled.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_delayed_job_runs_after_its_delay() {
    let harness = TestHarness::new();
    let queue = harness
        .registry
        .create_queue(JobType::Email, None)
        .await
        .unwrap();
    harness
        .registry
        .create_worker(JobType::Email, Arc::new(PayloadDrivenProcessor), None)
        .await
        .unwrap();

    let job_id = queue
        .enqueue_raw(
            "email",
            serde_json::json!({}),
            EnqueueOptions {
                delay: Some(Duration::from_millis(50)),
            },
        )
        .await
        .unwrap();

    let job = harness
        .registry
        .get_job_details(queue.name(), job_id)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Delayed);

    wait_for_status(
        &harness.broker,
        queue.name(),
        job_id,
        JobStatus::Completed,
        Duration::from_secs(5),
    )
    .await;
}

#[tokio::test]
async fn test_drain_discards_waiting_but_keeps_delayed() {
    let harness = TestHarness::new();
    let queue = harness
        .registry
        .create_queue(JobType::Email, None)
        .await
        .unwrap();

    for _ in 0..3 {
        queue
            .enqueue_raw("email", serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();
    }
    queue
        .enqueue_raw(
            "email",
            serde_json::json!({}),
            EnqueueOptions {
                delay: Some(Duration::from_secs(300)),
            },
        )
        .await
        .unwrap();

    let removed = queue.drain().await.unwrap();
    assert_eq!(removed, 3);

    let counts = queue.counts().await.unwrap();
    assert_eq!(counts.waiting, 0);
    assert_eq!(counts.delayed, 1);
}
