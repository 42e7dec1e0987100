//! Integration tests for the scheduler against the real cron engine.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use learnhub_broker::BrokerClient;
use learnhub_core::config::scheduler::SchedulerConfig;
use learnhub_core::error::ErrorKind;
use learnhub_core::traits::cron::CronEngine;
use learnhub_entity::job::JobType;
use learnhub_worker::{Scheduler, TokioCronEngine};

use crate::helpers::TestHarness;

const ALL_TASKS: [&str; 5] = [
    "hourly-metrics",
    "daily-analytics",
    "weekly-reports",
    "monthly-reports",
    "daily-cleanup",
];

async fn build_scheduler(harness: &TestHarness) -> Scheduler {
    let engine = Arc::new(TokioCronEngine::new().await.unwrap()) as Arc<dyn CronEngine>;
    Scheduler::new(
        Arc::clone(&harness.registry),
        engine,
        SchedulerConfig::default(),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_initialize_registers_the_default_tasks() {
    let harness = TestHarness::new();
    let scheduler = build_scheduler(&harness).await;
    scheduler.initialize().await.unwrap();

    let status = scheduler.status();
    assert!(status.is_initialized);
    assert_eq!(status.scheduled_tasks, ALL_TASKS);
    for name in ALL_TASKS {
        assert_eq!(status.task_statuses.get(name), Some(&true), "{name}");
    }

    let health = scheduler.health_check().await;
    assert!(health.scheduler);
    assert!(health.queue);
    assert!(health.tasks.values().all(|up| *up));

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trigger_weekly_reports_enqueues_trailing_window() {
    let harness = TestHarness::new();
    let scheduler = build_scheduler(&harness).await;
    scheduler.initialize().await.unwrap();

    let job_id = scheduler.trigger_weekly_reports().await.unwrap();
    let queue_name = harness.registry.queue_name(JobType::TrendReport);
    let job = harness
        .registry
        .get_job_details(&queue_name, job_id)
        .await
        .unwrap();

    assert_eq!(job.payload["job_type"], "trend-report");
    let start: DateTime<Utc> = job.payload["period_start"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    let end: DateTime<Utc> = job.payload["period_end"].as_str().unwrap().parse().unwrap();
    assert_eq!(end - start, chrono::Duration::days(7));

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trigger_monthly_reports_covers_previous_month() {
    let harness = TestHarness::new();
    let scheduler = build_scheduler(&harness).await;
    scheduler.initialize().await.unwrap();

    let job_id = scheduler.trigger_monthly_reports().await.unwrap();
    let queue_name = harness.registry.queue_name(JobType::ExecutiveSummary);
    let job = harness
        .registry
        .get_job_details(&queue_name, job_id)
        .await
        .unwrap();

    let start: NaiveDate = job.payload["period_start"].as_str().unwrap().parse().unwrap();
    let end: NaiveDate = job.payload["period_end"].as_str().unwrap().parse().unwrap();

    let today = Utc::now().date_naive();
    let expected_end = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap();
    assert_eq!(end, expected_end);
    assert_eq!(start.day(), 1);
    assert!(start < end);

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trigger_daily_analytics_enqueues_both_jobs() {
    let harness = TestHarness::new();
    let scheduler = build_scheduler(&harness).await;
    scheduler.initialize().await.unwrap();

    let job_ids = scheduler.trigger_daily_analytics().await.unwrap();
    assert_eq!(job_ids.len(), 2);

    let course = harness.registry.queue_name(JobType::CourseAnalytics);
    let student = harness.registry.queue_name(JobType::StudentAnalytics);
    assert_eq!(harness.broker.get_counts(&course).await.unwrap().waiting, 1);
    assert_eq!(harness.broker.get_counts(&student).await.unwrap().waiting, 1);

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trigger_cleanup_carries_the_grace_window() {
    let harness = TestHarness::new();
    let scheduler = build_scheduler(&harness).await;
    scheduler.initialize().await.unwrap();

    let job_id = scheduler.trigger_cleanup().await.unwrap();
    let queue_name = harness.registry.queue_name(JobType::QueueCleanup);
    let job = harness
        .registry
        .get_job_details(&queue_name, job_id)
        .await
        .unwrap();
    assert_eq!(job.payload["grace_hours"], 168);

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_task_start_stop_semantics() {
    let harness = TestHarness::new();
    let scheduler = build_scheduler(&harness).await;
    scheduler.initialize().await.unwrap();

    assert!(scheduler.stop_task("daily-analytics").await);
    assert!(scheduler.stop_task("daily-analytics").await);
    assert_eq!(
        scheduler.status().task_statuses.get("daily-analytics"),
        Some(&false)
    );

    assert!(scheduler.start_task("daily-analytics").await);
    assert_eq!(
        scheduler.status().task_statuses.get("daily-analytics"),
        Some(&true)
    );

    assert!(!scheduler.stop_task("yearly-retrospective").await);
    assert!(!scheduler.start_task("yearly-retrospective").await);

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trigger_before_initialize_is_a_configuration_error() {
    let harness = TestHarness::new();
    let scheduler = build_scheduler(&harness).await;

    let err = scheduler.trigger_weekly_reports().await.unwrap_err();
    assert!(err.is_kind(ErrorKind::Configuration));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_tears_down_tasks_and_registry() {
    let harness = TestHarness::new();
    let scheduler = build_scheduler(&harness).await;
    scheduler.initialize().await.unwrap();
    assert!(harness.registry.queue_count() > 0);

    scheduler.shutdown().await;

    let status = scheduler.status();
    assert!(!status.is_initialized);
    assert!(status.scheduled_tasks.is_empty());
    assert_eq!(harness.registry.queue_count(), 0);
    assert_eq!(harness.registry.worker_count(), 0);
}
