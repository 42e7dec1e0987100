//! Broker client trait for pluggable job-store backends.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use learnhub_core::result::AppResult;
use learnhub_entity::job::{Job, JobStatus, JobTypeConfig, QueueCounts, QueueJobEvent};

use crate::processor::JobProcessor;

/// Options applied to a single enqueue call.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Hold the job in the `delayed` state for this long before it
    /// becomes eligible to run.
    pub delay: Option<Duration>,
}

/// Trait for durable job-store backends.
///
/// The broker owns all job state and provides at-least-once delivery;
/// exactly-once execution is explicitly not guaranteed. Retry, backoff,
/// and stalled-job recovery follow the policy in each queue's
/// [`JobTypeConfig`].
#[async_trait]
pub trait BrokerClient: Send + Sync + fmt::Debug + 'static {
    /// Declare a queue with its policy. Idempotent: declaring an existing
    /// queue keeps the original policy.
    async fn ensure_queue(&self, config: &JobTypeConfig) -> AppResult<()>;

    /// Add a job to a queue and return its id.
    async fn enqueue(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> AppResult<Uuid>;

    /// Per-status job counts for a queue.
    async fn get_counts(&self, queue: &str) -> AppResult<QueueCounts>;

    /// Fetch one job. Returns `None` if the job does not exist (or has
    /// been removed by a retention policy).
    async fn get_job(&self, queue: &str, job_id: Uuid) -> AppResult<Option<Job>>;

    /// List the jobs currently in the given status.
    async fn get_jobs_by_status(&self, queue: &str, status: JobStatus) -> AppResult<Vec<Job>>;

    /// Move a failed job back to the waiting list.
    async fn retry_job(&self, queue: &str, job_id: Uuid) -> AppResult<()>;

    /// Record processor progress (0-100). Also serves as the liveness
    /// heartbeat for stalled-job detection.
    async fn update_progress(&self, queue: &str, job_id: Uuid, progress: u8) -> AppResult<()>;

    /// Stop dispatching waiting jobs. Active jobs run to completion.
    async fn pause_queue(&self, queue: &str) -> AppResult<()>;

    /// Resume dispatching after [`Self::pause_queue`].
    async fn resume_queue(&self, queue: &str) -> AppResult<()>;

    /// Remove job records. With a status filter only jobs in that status
    /// are removed; without one, completed, failed, waiting, and active
    /// records are removed. Returns the number of removed jobs.
    async fn clean_queue(&self, queue: &str, status: Option<JobStatus>) -> AppResult<u64>;

    /// Remove every waiting job without processing it. Returns the number
    /// of removed jobs.
    async fn drain_queue(&self, queue: &str) -> AppResult<u64>;

    /// Close a queue and release its resources.
    async fn close_queue(&self, queue: &str) -> AppResult<()>;

    /// Bind a consumer to a queue. At most one worker per queue.
    async fn start_worker(
        &self,
        queue: &str,
        processor: Arc<dyn JobProcessor>,
        concurrency: usize,
    ) -> AppResult<()>;

    /// Stop the worker from pulling new jobs without closing it.
    async fn pause_worker(&self, queue: &str) -> AppResult<()>;

    /// Resume pulling after [`Self::pause_worker`].
    async fn resume_worker(&self, queue: &str) -> AppResult<()>;

    /// Stop the worker, waiting for in-flight jobs up to the configured
    /// grace period. Idempotent.
    async fn close_worker(&self, queue: &str) -> AppResult<()>;

    /// Subscribe to the queue's lifecycle event stream.
    async fn subscribe(&self, queue: &str) -> AppResult<broadcast::Receiver<QueueJobEvent>>;

    /// Check that the broker is reachable.
    async fn health_check(&self) -> AppResult<bool>;
}
