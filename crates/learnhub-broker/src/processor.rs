//! Job processor trait and execution context.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use learnhub_core::error::AppError;
use learnhub_core::result::AppResult;
use learnhub_entity::job::Job;

use crate::client::BrokerClient;

/// Error from job execution.
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Permanent failure — do not retry.
    #[error("permanent job failure: {0}")]
    Permanent(String),

    /// Transient failure — retried per the queue's backoff policy.
    #[error("transient job failure: {0}")]
    Transient(String),

    /// Internal error — treated as terminal.
    #[error("internal error: {0}")]
    Internal(#[from] AppError),
}

/// Trait for job processor implementations.
///
/// The processor holds the business logic for one queue; this core only
/// dispatches jobs into it and reacts to the outcome.
#[async_trait]
pub trait JobProcessor: Send + Sync + fmt::Debug {
    /// Execute one job.
    ///
    /// Returning `Ok` completes the job with the optional result value.
    /// A [`JobExecutionError::Transient`] failure consumes one attempt
    /// and is retried while attempts remain.
    async fn process(
        &self,
        job: &Job,
        ctx: &JobContext,
    ) -> Result<Option<serde_json::Value>, JobExecutionError>;
}

/// Execution context handed to a processor alongside the job.
#[derive(Debug, Clone)]
pub struct JobContext {
    queue: String,
    job_id: Uuid,
    broker: Arc<dyn BrokerClient>,
}

impl JobContext {
    /// Create a context for one job execution.
    pub fn new(queue: impl Into<String>, job_id: Uuid, broker: Arc<dyn BrokerClient>) -> Self {
        Self {
            queue: queue.into(),
            job_id,
            broker,
        }
    }

    /// Queue the job belongs to.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// The job being processed.
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Report progress (0-100). Doubles as the liveness heartbeat used
    /// for stalled-job detection.
    pub async fn report_progress(&self, progress: u8) -> AppResult<()> {
        self.broker
            .update_progress(&self.queue, self.job_id, progress.min(100))
            .await
    }
}
