//! Job lifecycle events emitted by the broker.
//!
//! Events are published per queue on a broadcast channel and consumed by
//! the registry's listener-dispatch task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One job lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    /// A job entered the waiting list.
    Waiting {
        /// The job ID.
        job_id: Uuid,
    },
    /// A worker picked the job up.
    Active {
        /// The job ID.
        job_id: Uuid,
    },
    /// The processor reported progress.
    Progress {
        /// The job ID.
        job_id: Uuid,
        /// Progress percentage, 0-100.
        progress: u8,
    },
    /// The job completed successfully.
    Completed {
        /// The job ID.
        job_id: Uuid,
        /// Result data returned by the processor.
        result: Option<serde_json::Value>,
    },
    /// An attempt failed.
    Failed {
        /// The job ID.
        job_id: Uuid,
        /// Attempts completed so far.
        attempts_made: u32,
        /// Failure reason reported by the processor.
        reason: String,
        /// Whether the broker will retry the job.
        retrying: bool,
    },
    /// An active job stopped reporting a heartbeat.
    Stalled {
        /// The job ID.
        job_id: Uuid,
        /// How many stalls this job has accumulated.
        stalled_count: u32,
    },
    /// The queue itself reported an error.
    QueueError {
        /// Error description.
        message: String,
    },
}

/// Wrapper adding queue name and timestamp to a [`JobEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJobEvent {
    /// Queue the event belongs to.
    pub queue: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// The event payload.
    pub event: JobEvent,
}

impl QueueJobEvent {
    /// Create a new event stamped with the current time.
    pub fn new(queue: impl Into<String>, event: JobEvent) -> Self {
        Self {
            queue: queue.into(),
            timestamp: Utc::now(),
            event,
        }
    }
}
