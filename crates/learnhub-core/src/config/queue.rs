//! Queue policy configuration.

use serde::{Deserialize, Serialize};

/// Default policy applied to every job queue.
///
/// Individual job types adjust these values (see `JobType::config` in the
/// entity crate), and callers may further override them per queue at
/// creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Namespace prefix for queue names (e.g. `"learnhub"`).
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Default number of concurrent jobs per worker.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Default maximum retry attempts for a failed job.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential retry backoff.
    #[serde(default = "default_backoff_delay")]
    pub backoff_delay_ms: u64,
    /// Whether completed jobs are removed from the broker.
    #[serde(default)]
    pub remove_on_complete: bool,
    /// Whether terminally failed jobs are removed from the broker.
    #[serde(default)]
    pub remove_on_fail: bool,
    /// How many times a stalled job is requeued before it is failed.
    #[serde(default = "default_max_stalled")]
    pub max_stalled_count: u32,
    /// Interval in milliseconds without a heartbeat before an active job
    /// is considered stalled.
    #[serde(default = "default_stalled_interval")]
    pub stalled_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            backoff_delay_ms: default_backoff_delay(),
            remove_on_complete: false,
            remove_on_fail: false,
            max_stalled_count: default_max_stalled(),
            stalled_interval_ms: default_stalled_interval(),
        }
    }
}

fn default_prefix() -> String {
    "learnhub".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_delay() -> u64 {
    5_000
}

fn default_max_stalled() -> u32 {
    2
}

fn default_stalled_interval() -> u64 {
    30_000
}
