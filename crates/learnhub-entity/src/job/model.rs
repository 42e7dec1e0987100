//! Job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::JobStatus;

/// A background job.
///
/// The job record is owned by the broker; this core only reads and mutates
/// it through broker operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// Job name within the queue (usually the job type key).
    pub name: String,
    /// Queue name.
    pub queue: String,
    /// Job-specific payload (JSON).
    pub payload: serde_json::Value,
    /// Current job status.
    pub status: JobStatus,
    /// Number of completed execution attempts.
    pub attempts_made: u32,
    /// Maximum allowed retry attempts.
    pub max_retries: u32,
    /// Progress percentage, 0-100.
    pub progress: u8,
    /// Reason for the most recent failure.
    pub failure_reason: Option<String>,
    /// Result data on completion (JSON).
    pub result: Option<serde_json::Value>,
    /// How many times the job has been recovered from a stall.
    pub stalled_count: u32,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the current attempt started executing.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// When a delayed job becomes eligible to run.
    pub delay_until: Option<DateTime<Utc>>,
}

impl Job {
    /// Check if the job has retry attempts left.
    pub fn can_retry(&self) -> bool {
        self.status.can_retry() && self.attempts_made < self.max_retries
    }
}

/// Per-status job counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Jobs waiting for a worker slot.
    pub waiting: u64,
    /// Jobs currently executing.
    pub active: u64,
    /// Successfully completed jobs still retained.
    pub completed: u64,
    /// Terminally failed jobs still retained.
    pub failed: u64,
    /// Jobs waiting on a delay or retry backoff.
    pub delayed: u64,
    /// Waiting jobs held back by a paused queue.
    pub paused: u64,
}

impl QueueCounts {
    /// Total number of job records behind these counts.
    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed + self.delayed + self.paused
    }
}
