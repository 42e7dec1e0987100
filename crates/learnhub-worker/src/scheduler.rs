//! Cron-driven scheduler for the platform's recurring jobs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use learnhub_broker::EnqueueOptions;
use learnhub_core::config::scheduler::SchedulerConfig;
use learnhub_core::error::AppError;
use learnhub_core::result::AppResult;
use learnhub_core::traits::cron::{CronEngine, CronTaskHandle, CronTaskStatus, TaskCallback};
use learnhub_entity::job::{JobPayload, JobType};

use crate::registry::{JobQueueRegistry, QueueStats};

/// Hourly real-time metrics task name.
pub const HOURLY_METRICS: &str = "hourly-metrics";
/// Daily course/student analytics task name.
pub const DAILY_ANALYTICS: &str = "daily-analytics";
/// Weekly trend report task name.
pub const WEEKLY_REPORTS: &str = "weekly-reports";
/// Monthly executive summary task name.
pub const MONTHLY_REPORTS: &str = "monthly-reports";
/// Daily broker cleanup task name.
pub const DAILY_CLEANUP: &str = "daily-cleanup";

const TASK_NAMES: [&str; 5] = [
    HOURLY_METRICS,
    DAILY_ANALYTICS,
    WEEKLY_REPORTS,
    MONTHLY_REPORTS,
    DAILY_CLEANUP,
];

/// Cleanup retains job records newer than this.
const CLEANUP_GRACE_HOURS: u32 = 168;

/// One registered cron task.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    /// Task name.
    pub name: String,
    /// Five-field cron expression.
    pub expression: String,
    /// IANA timezone the expression is evaluated in.
    pub timezone: String,
    handle: Arc<dyn CronTaskHandle>,
}

/// Snapshot returned by [`Scheduler::status`].
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// Whether `initialize` has completed.
    pub is_initialized: bool,
    /// The scheduler configuration in effect.
    pub config: SchedulerConfig,
    /// Names of all registered tasks, in registration order.
    pub scheduled_tasks: Vec<String>,
    /// Task name → whether the task is currently scheduled.
    pub task_statuses: HashMap<String, bool>,
}

/// Snapshot returned by [`Scheduler::health_check`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Whether the scheduler is initialized.
    pub scheduler: bool,
    /// Whether the broker is reachable.
    pub queue: bool,
    /// Task name → whether the task is currently scheduled.
    pub tasks: HashMap<String, bool>,
}

/// Owns the fixed set of recurring tasks that produce the platform's
/// analytics, report, and maintenance jobs.
///
/// Constructed once at startup with its collaborators and passed by
/// reference; running a second instance in another process duplicates
/// every scheduled enqueue.
#[derive(Debug)]
pub struct Scheduler {
    registry: Arc<JobQueueRegistry>,
    engine: Arc<dyn CronEngine>,
    config: SchedulerConfig,
    tasks: DashMap<String, ScheduledTask>,
    initialized: AtomicBool,
}

impl Scheduler {
    /// Create a scheduler over the given registry and cron engine.
    pub fn new(
        registry: Arc<JobQueueRegistry>,
        engine: Arc<dyn CronEngine>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            engine,
            config,
            tasks: DashMap::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Register the five recurring tasks and mark the scheduler ready.
    pub async fn initialize(&self) -> AppResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Err(AppError::configuration("scheduler is already initialized"));
        }

        // Create the scheduled queues up front so stats and triggers see
        // them immediately.
        for job_type in [
            JobType::RealtimeMetrics,
            JobType::CourseAnalytics,
            JobType::StudentAnalytics,
            JobType::TrendReport,
            JobType::ExecutiveSummary,
            JobType::QueueCleanup,
        ] {
            self.registry.create_queue(job_type, None).await?;
        }

        self.register_hourly_metrics().await?;
        self.register_daily_analytics().await?;
        self.register_weekly_reports().await?;
        self.register_monthly_reports().await?;
        self.register_daily_cleanup().await?;

        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!("Scheduler initialized with {} tasks", self.tasks.len());
        Ok(())
    }

    /// Enqueue a real-time metrics job immediately.
    pub async fn trigger_realtime_metrics(&self) -> AppResult<Uuid> {
        self.ensure_initialized()?;
        enqueue_realtime_metrics(&self.registry).await
    }

    /// Enqueue the daily course + student analytics jobs immediately.
    pub async fn trigger_daily_analytics(&self) -> AppResult<Vec<Uuid>> {
        self.ensure_initialized()?;
        enqueue_daily_analytics(&self.registry).await
    }

    /// Enqueue a trend report for the trailing seven days immediately.
    pub async fn trigger_weekly_reports(&self) -> AppResult<Uuid> {
        self.ensure_initialized()?;
        enqueue_weekly_reports(&self.registry).await
    }

    /// Enqueue an executive summary for the previous calendar month
    /// immediately.
    pub async fn trigger_monthly_reports(&self) -> AppResult<Uuid> {
        self.ensure_initialized()?;
        enqueue_monthly_reports(&self.registry).await
    }

    /// Enqueue a broker cleanup job immediately.
    pub async fn trigger_cleanup(&self) -> AppResult<Uuid> {
        self.ensure_initialized()?;
        enqueue_cleanup(&self.registry).await
    }

    /// Start one task by name. Returns `false` for unknown names.
    pub async fn start_task(&self, name: &str) -> bool {
        let Some(task) = self.tasks.get(name).map(|entry| entry.value().clone()) else {
            tracing::warn!("Cannot start unknown scheduled task '{}'", name);
            return false;
        };
        match task.handle.start().await {
            Ok(()) => {
                tracing::info!("Scheduled task '{}' started", name);
                true
            }
            Err(err) => {
                tracing::error!("Failed to start task '{}': {}", name, err);
                false
            }
        }
    }

    /// Stop one task by name without unregistering it. Stopping an
    /// already-stopped task is a safe no-op returning `true`; unknown
    /// names return `false`.
    pub async fn stop_task(&self, name: &str) -> bool {
        let Some(task) = self.tasks.get(name).map(|entry| entry.value().clone()) else {
            tracing::warn!("Cannot stop unknown scheduled task '{}'", name);
            return false;
        };
        match task.handle.stop().await {
            Ok(()) => {
                tracing::info!("Scheduled task '{}' stopped", name);
                true
            }
            Err(err) => {
                tracing::error!("Failed to stop task '{}': {}", name, err);
                false
            }
        }
    }

    /// Start every registered task, best-effort per task.
    pub async fn start_all_tasks(&self) {
        for name in TASK_NAMES {
            if self.tasks.contains_key(name) {
                self.start_task(name).await;
            }
        }
    }

    /// Stop every registered task, best-effort per task.
    pub async fn stop_all_tasks(&self) {
        for name in TASK_NAMES {
            if self.tasks.contains_key(name) {
                self.stop_task(name).await;
            }
        }
    }

    /// Current scheduler snapshot.
    pub fn status(&self) -> SchedulerStatus {
        let scheduled_tasks: Vec<String> = TASK_NAMES
            .iter()
            .filter(|name| self.tasks.contains_key(**name))
            .map(|name| name.to_string())
            .collect();
        let task_statuses = self.task_statuses();

        SchedulerStatus {
            is_initialized: self.initialized.load(Ordering::SeqCst),
            config: self.config.clone(),
            scheduled_tasks,
            task_statuses,
        }
    }

    /// Counts for every queue the registry knows about.
    pub async fn queue_stats(&self) -> Vec<QueueStats> {
        self.registry.get_all_queue_stats().await
    }

    /// Liveness of the scheduler, the broker, and each cron entry.
    pub async fn health_check(&self) -> HealthReport {
        HealthReport {
            scheduler: self.initialized.load(Ordering::SeqCst),
            queue: self.registry.health_check().await,
            tasks: self.task_statuses(),
        }
    }

    /// Stop every task, clear the task map, then shut the registry down.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down scheduler...");
        self.stop_all_tasks().await;
        self.tasks.clear();
        if let Err(err) = self.engine.shutdown().await {
            tracing::warn!("Cron engine shutdown failed: {}", err);
        }
        self.registry.shutdown().await;
        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!("Scheduler shut down");
    }

    fn ensure_initialized(&self) -> AppResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::configuration(
                "scheduler has not been initialized",
            ))
        }
    }

    fn task_statuses(&self) -> HashMap<String, bool> {
        self.tasks
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().handle.status() == CronTaskStatus::Scheduled,
                )
            })
            .collect()
    }

    async fn add_task(
        &self,
        name: &'static str,
        expression: &'static str,
        callback: TaskCallback,
    ) -> AppResult<()> {
        let handle = self
            .engine
            .schedule(name, expression, &self.config.timezone, callback)
            .await?;
        self.tasks.insert(
            name.to_string(),
            ScheduledTask {
                name: name.to_string(),
                expression: expression.to_string(),
                timezone: self.config.timezone.clone(),
                handle,
            },
        );
        tracing::info!("Registered: {} ({})", name, expression);
        Ok(())
    }

    /// Real-time metrics — every hour on the hour.
    async fn register_hourly_metrics(&self) -> AppResult<()> {
        let registry = Arc::clone(&self.registry);
        let callback: TaskCallback = Arc::new(move || {
            let registry = Arc::clone(&registry);
            Box::pin(async move {
                match enqueue_realtime_metrics(&registry).await {
                    Ok(job_id) => tracing::debug!("{} enqueued job {}", HOURLY_METRICS, job_id),
                    Err(err) => {
                        tracing::error!("Scheduled task '{}' failed: {}", HOURLY_METRICS, err);
                    }
                }
            })
        });
        self.add_task(HOURLY_METRICS, "0 * * * *", callback).await
    }

    /// Course and student analytics — daily at midnight.
    async fn register_daily_analytics(&self) -> AppResult<()> {
        let registry = Arc::clone(&self.registry);
        let callback: TaskCallback = Arc::new(move || {
            let registry = Arc::clone(&registry);
            Box::pin(async move {
                match enqueue_daily_analytics(&registry).await {
                    Ok(job_ids) => {
                        tracing::debug!("{} enqueued {} jobs", DAILY_ANALYTICS, job_ids.len());
                    }
                    Err(err) => {
                        tracing::error!("Scheduled task '{}' failed: {}", DAILY_ANALYTICS, err);
                    }
                }
            })
        });
        self.add_task(DAILY_ANALYTICS, "0 0 * * *", callback).await
    }

    /// Trend report — Sundays at 1 AM.
    async fn register_weekly_reports(&self) -> AppResult<()> {
        let registry = Arc::clone(&self.registry);
        let callback: TaskCallback = Arc::new(move || {
            let registry = Arc::clone(&registry);
            Box::pin(async move {
                match enqueue_weekly_reports(&registry).await {
                    Ok(job_id) => tracing::debug!("{} enqueued job {}", WEEKLY_REPORTS, job_id),
                    Err(err) => {
                        tracing::error!("Scheduled task '{}' failed: {}", WEEKLY_REPORTS, err);
                    }
                }
            })
        });
        self.add_task(WEEKLY_REPORTS, "0 1 * * 0", callback).await
    }

    /// Executive summary — first of the month at 2 AM.
    async fn register_monthly_reports(&self) -> AppResult<()> {
        let registry = Arc::clone(&self.registry);
        let callback: TaskCallback = Arc::new(move || {
            let registry = Arc::clone(&registry);
            Box::pin(async move {
                match enqueue_monthly_reports(&registry).await {
                    Ok(job_id) => tracing::debug!("{} enqueued job {}", MONTHLY_REPORTS, job_id),
                    Err(err) => {
                        tracing::error!("Scheduled task '{}' failed: {}", MONTHLY_REPORTS, err);
                    }
                }
            })
        });
        self.add_task(MONTHLY_REPORTS, "0 2 1 * *", callback).await
    }

    /// Broker cleanup — daily at 3 AM.
    async fn register_daily_cleanup(&self) -> AppResult<()> {
        let registry = Arc::clone(&self.registry);
        let callback: TaskCallback = Arc::new(move || {
            let registry = Arc::clone(&registry);
            Box::pin(async move {
                match enqueue_cleanup(&registry).await {
                    Ok(job_id) => tracing::debug!("{} enqueued job {}", DAILY_CLEANUP, job_id),
                    Err(err) => {
                        tracing::error!("Scheduled task '{}' failed: {}", DAILY_CLEANUP, err);
                    }
                }
            })
        });
        self.add_task(DAILY_CLEANUP, "0 3 * * *", callback).await
    }
}

// The scheduled and manually-triggered variants share these enqueue paths
// so both produce identical payload shapes.

async fn enqueue_realtime_metrics(registry: &JobQueueRegistry) -> AppResult<Uuid> {
    let queue = registry.create_queue(JobType::RealtimeMetrics, None).await?;
    queue
        .enqueue(
            &JobPayload::RealtimeMetrics {
                window_start: Utc::now(),
            },
            EnqueueOptions::default(),
        )
        .await
}

async fn enqueue_daily_analytics(registry: &JobQueueRegistry) -> AppResult<Vec<Uuid>> {
    let date = (Utc::now() - chrono::Duration::days(1)).date_naive();

    let course_queue = registry.create_queue(JobType::CourseAnalytics, None).await?;
    let course_id = course_queue
        .enqueue(
            &JobPayload::CourseAnalytics { date },
            EnqueueOptions::default(),
        )
        .await?;

    let student_queue = registry
        .create_queue(JobType::StudentAnalytics, None)
        .await?;
    let student_id = student_queue
        .enqueue(
            &JobPayload::StudentAnalytics { date },
            EnqueueOptions::default(),
        )
        .await?;

    Ok(vec![course_id, student_id])
}

async fn enqueue_weekly_reports(registry: &JobQueueRegistry) -> AppResult<Uuid> {
    let (period_start, period_end) = trailing_week(Utc::now());
    let queue = registry.create_queue(JobType::TrendReport, None).await?;
    queue
        .enqueue(
            &JobPayload::TrendReport {
                period_start,
                period_end,
            },
            EnqueueOptions::default(),
        )
        .await
}

async fn enqueue_monthly_reports(registry: &JobQueueRegistry) -> AppResult<Uuid> {
    let (period_start, period_end) = previous_month(Utc::now().date_naive());
    let queue = registry.create_queue(JobType::ExecutiveSummary, None).await?;
    queue
        .enqueue(
            &JobPayload::ExecutiveSummary {
                period_start,
                period_end,
            },
            EnqueueOptions::default(),
        )
        .await
}

async fn enqueue_cleanup(registry: &JobQueueRegistry) -> AppResult<Uuid> {
    let queue = registry.create_queue(JobType::QueueCleanup, None).await?;
    queue
        .enqueue(
            &JobPayload::QueueCleanup {
                grace_hours: CLEANUP_GRACE_HOURS,
            },
            EnqueueOptions::default(),
        )
        .await
}

/// The trailing seven-day window ending now.
fn trailing_week(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (now - chrono::Duration::days(7), now)
}

/// The previous calendar month as `[first day, first day of current)`.
fn previous_month(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let current = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today);
    let previous = if current.month() == 1 {
        NaiveDate::from_ymd_opt(current.year() - 1, 12, 1)
    } else {
        NaiveDate::from_ymd_opt(current.year(), current.month() - 1, 1)
    }
    .unwrap_or(current);
    (previous, current)
}
