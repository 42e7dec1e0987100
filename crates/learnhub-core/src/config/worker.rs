//! Background worker configuration.

use serde::{Deserialize, Serialize};

/// Background job worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether workers are enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interval in milliseconds between queue dispatch polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// How long a closing worker waits for in-flight jobs, in seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: default_poll_interval(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    250
}

fn default_shutdown_grace() -> u64 {
    30
}
