//! Job status enumeration and state-machine predicates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use learnhub_core::error::AppError;

/// Status of a background job.
///
/// `Paused` is a virtual state: it is what a waiting job reports while its
/// queue is paused. The broker never dispatches jobs out of it until the
/// queue is resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be picked up by a worker.
    Waiting,
    /// Currently being processed by a worker.
    Active,
    /// Successfully completed.
    Completed,
    /// Failed; terminal once retry attempts are exhausted.
    Failed,
    /// Scheduled to become waiting at a later time.
    Delayed,
    /// Waiting in a paused queue.
    Paused,
    /// Active worker stopped reporting a heartbeat.
    Stalled,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if the job can be retried.
    pub fn can_retry(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Delayed => "delayed",
            Self::Paused => "paused",
            Self::Stalled => "stalled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "delayed" => Ok(Self::Delayed),
            "paused" => Ok(Self::Paused),
            "stalled" => Ok(Self::Stalled),
            other => Err(AppError::invalid_action(format!(
                "unknown job status '{other}'"
            ))),
        }
    }
}
