//! Per-queue policy configuration.

use serde::{Deserialize, Serialize};

use learnhub_core::config::queue::QueueConfig;
use learnhub_core::error::AppError;

use super::kind::JobType;

/// Immutable policy for one queue, fixed once a queue or worker handle is
/// created from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTypeConfig {
    /// Resolved queue name (namespaced, e.g. `"learnhub:email"`).
    pub name: String,
    /// Number of concurrent jobs a worker may process.
    pub concurrency: usize,
    /// Maximum retry attempts for a failed job.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential retry backoff.
    pub backoff_delay_ms: u64,
    /// Whether completed jobs are removed from the broker.
    pub remove_on_complete: bool,
    /// Whether terminally failed jobs are removed from the broker.
    pub remove_on_fail: bool,
    /// How many times a stalled job is requeued before it is failed.
    pub max_stalled_count: u32,
    /// Interval in milliseconds without a heartbeat before an active job
    /// is considered stalled.
    pub stalled_interval_ms: u64,
}

impl JobTypeConfig {
    /// Build the policy for a job type from the queue defaults.
    ///
    /// Starts from [`QueueConfig`] and applies the per-type adjustments
    /// below; callers may further override via [`JobTypeOverrides`].
    pub fn for_type(job_type: JobType, defaults: &QueueConfig) -> Self {
        let mut config = Self {
            name: job_type.queue_name(&defaults.prefix),
            concurrency: defaults.concurrency,
            max_retries: defaults.max_retries,
            backoff_delay_ms: defaults.backoff_delay_ms,
            remove_on_complete: defaults.remove_on_complete,
            remove_on_fail: defaults.remove_on_fail,
            max_stalled_count: defaults.max_stalled_count,
            stalled_interval_ms: defaults.stalled_interval_ms,
        };

        match job_type {
            JobType::RealtimeMetrics => {
                config.concurrency = 2;
                config.max_retries = 2;
                config.backoff_delay_ms = 2_000;
            }
            JobType::CourseAnalytics | JobType::StudentAnalytics => {
                config.concurrency = 2;
            }
            JobType::TrendReport | JobType::ExecutiveSummary => {
                config.concurrency = 1;
            }
            JobType::QueueCleanup => {
                config.concurrency = 1;
                config.max_retries = 1;
            }
            JobType::Email => {
                config.concurrency = 8;
                config.backoff_delay_ms = 1_000;
            }
            JobType::VideoTranscode => {
                config.concurrency = 1;
                config.max_retries = 2;
                config.backoff_delay_ms = 10_000;
                config.stalled_interval_ms = config.stalled_interval_ms.max(60_000);
            }
            JobType::QuizExport => {
                config.concurrency = 2;
            }
        }

        config
    }

    /// Validate the merged policy.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.concurrency == 0 {
            return Err(AppError::configuration(format!(
                "queue '{}': concurrency must be at least 1",
                self.name
            )));
        }
        if self.stalled_interval_ms == 0 {
            return Err(AppError::configuration(format!(
                "queue '{}': stalled_interval_ms must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

/// Partial policy overrides applied on top of a type's defaults at queue
/// or worker creation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobTypeOverrides {
    /// Override worker concurrency.
    pub concurrency: Option<usize>,
    /// Override maximum retry attempts.
    pub max_retries: Option<u32>,
    /// Override the backoff base delay.
    pub backoff_delay_ms: Option<u64>,
    /// Override completed-job removal.
    pub remove_on_complete: Option<bool>,
    /// Override failed-job removal.
    pub remove_on_fail: Option<bool>,
    /// Override the stalled requeue limit.
    pub max_stalled_count: Option<u32>,
    /// Override the stalled heartbeat interval.
    pub stalled_interval_ms: Option<u64>,
}

impl JobTypeOverrides {
    /// Apply these overrides to a base policy.
    pub fn apply(&self, mut config: JobTypeConfig) -> JobTypeConfig {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(backoff) = self.backoff_delay_ms {
            config.backoff_delay_ms = backoff;
        }
        if let Some(remove) = self.remove_on_complete {
            config.remove_on_complete = remove;
        }
        if let Some(remove) = self.remove_on_fail {
            config.remove_on_fail = remove;
        }
        if let Some(count) = self.max_stalled_count {
            config.max_stalled_count = count;
        }
        if let Some(interval) = self.stalled_interval_ms {
            config.stalled_interval_ms = interval;
        }
        config
    }
}
