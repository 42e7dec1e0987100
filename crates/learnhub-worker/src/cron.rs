//! Cron engine backed by tokio-cron-scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono_tz::Tz;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};

use learnhub_core::error::AppError;
use learnhub_core::result::AppResult;
use learnhub_core::traits::cron::{CronEngine, CronTaskHandle, CronTaskStatus, TaskCallback};

/// Normalize a 5-field cron expression (minute hour day month weekday) to
/// the 6-field form the underlying library expects, with a fixed seconds
/// field of `0`.
pub fn normalize_cron(expression: &str) -> AppResult<String> {
    let trimmed = expression.trim();
    match trimmed.split_whitespace().count() {
        5 => Ok(format!("0 {trimmed}")),
        6 | 7 => Ok(trimmed.to_string()),
        fields => Err(AppError::scheduler(format!(
            "invalid cron expression '{expression}': expected 5 fields, got {fields}"
        ))),
    }
}

/// Cron engine driving callbacks through a shared tokio-cron-scheduler.
///
/// Per-task stop is implemented as an enabled flag checked on every tick,
/// so stopping never unschedules the underlying entry and starting again
/// needs no re-registration.
pub struct TokioCronEngine {
    scheduler: JobScheduler,
}

impl std::fmt::Debug for TokioCronEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioCronEngine").finish()
    }
}

impl TokioCronEngine {
    /// Create and start the underlying scheduler.
    pub async fn new() -> AppResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::scheduler(format!("Failed to create cron scheduler: {e}")))?;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::scheduler(format!("Failed to start cron scheduler: {e}")))?;
        Ok(Self { scheduler })
    }
}

/// Handle to one task registered with [`TokioCronEngine`].
#[derive(Debug)]
struct TokioCronTask {
    name: String,
    enabled: Arc<AtomicBool>,
}

#[async_trait]
impl CronTaskHandle for TokioCronTask {
    async fn start(&self) -> AppResult<()> {
        self.enabled.store(true, Ordering::Relaxed);
        tracing::debug!("Cron task '{}' started", self.name);
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        self.enabled.store(false, Ordering::Relaxed);
        tracing::debug!("Cron task '{}' stopped", self.name);
        Ok(())
    }

    fn status(&self) -> CronTaskStatus {
        if self.enabled.load(Ordering::Relaxed) {
            CronTaskStatus::Scheduled
        } else {
            CronTaskStatus::Stopped
        }
    }
}

#[async_trait]
impl CronEngine for TokioCronEngine {
    async fn schedule(
        &self,
        name: &str,
        expression: &str,
        timezone: &str,
        callback: TaskCallback,
    ) -> AppResult<Arc<dyn CronTaskHandle>> {
        let normalized = normalize_cron(expression)?;
        let tz: Tz = timezone
            .parse()
            .map_err(|_| AppError::scheduler(format!("unknown timezone '{timezone}'")))?;

        let enabled = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&enabled);
        let task_name = name.to_string();

        let job = CronJob::new_async_tz(normalized.as_str(), tz, move |_uuid, _lock| {
            let callback = Arc::clone(&callback);
            let flag = Arc::clone(&flag);
            let task_name = task_name.clone();
            Box::pin(async move {
                if !flag.load(Ordering::Relaxed) {
                    tracing::debug!("Cron task '{}' is stopped, skipping tick", task_name);
                    return;
                }
                callback().await;
            })
        })
        .map_err(|e| {
            AppError::scheduler(format!("invalid cron expression '{expression}': {e}"))
        })?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::scheduler(format!("Failed to schedule task '{name}': {e}")))?;

        tracing::info!(
            "Registered cron task '{}' ({} {})",
            name,
            expression,
            timezone
        );
        Ok(Arc::new(TokioCronTask {
            name: name.to_string(),
            enabled,
        }))
    }

    async fn shutdown(&self) -> AppResult<()> {
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::scheduler(format!("Failed to shut down cron scheduler: {e}")))?;
        tracing::info!("Cron engine shut down");
        Ok(())
    }
}
