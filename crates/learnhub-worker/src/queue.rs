//! Typed handle over one named job queue.

use std::sync::Arc;

use uuid::Uuid;

use learnhub_broker::{BrokerClient, EnqueueOptions};
use learnhub_core::result::AppResult;
use learnhub_entity::job::{JobPayload, JobStatus, JobTypeConfig, QueueCounts};

/// Handle to one named queue.
///
/// Created by the registry; repeated creation for the same name returns
/// the same handle. All operations go through the broker.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    name: String,
    config: JobTypeConfig,
    broker: Arc<dyn BrokerClient>,
}

impl QueueHandle {
    pub(crate) fn new(name: String, config: JobTypeConfig, broker: Arc<dyn BrokerClient>) -> Self {
        Self {
            name,
            config,
            broker,
        }
    }

    /// The resolved queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The immutable policy this queue was created with.
    pub fn config(&self) -> &JobTypeConfig {
        &self.config
    }

    /// Enqueue a typed payload. The job name is the payload's job type key.
    pub async fn enqueue(&self, payload: &JobPayload, opts: EnqueueOptions) -> AppResult<Uuid> {
        let value = serde_json::to_value(payload)?;
        self.broker
            .enqueue(&self.name, payload.job_type().as_str(), value, opts)
            .await
    }

    /// Enqueue an ad-hoc job with an explicit name and raw JSON payload.
    pub async fn enqueue_raw(
        &self,
        job_name: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> AppResult<Uuid> {
        self.broker.enqueue(&self.name, job_name, payload, opts).await
    }

    /// Per-status job counts.
    pub async fn counts(&self) -> AppResult<QueueCounts> {
        self.broker.get_counts(&self.name).await
    }

    /// Stop dispatching waiting jobs. Active jobs run to completion.
    pub async fn pause(&self) -> AppResult<()> {
        self.broker.pause_queue(&self.name).await
    }

    /// Resume dispatching.
    pub async fn resume(&self) -> AppResult<()> {
        self.broker.resume_queue(&self.name).await
    }

    /// Remove job records, optionally restricted to one status.
    pub async fn clean(&self, status: Option<JobStatus>) -> AppResult<u64> {
        self.broker.clean_queue(&self.name, status).await
    }

    /// Remove every waiting job without processing it.
    pub async fn drain(&self) -> AppResult<u64> {
        self.broker.drain_queue(&self.name).await
    }

    /// Close the queue in the broker.
    pub async fn close(&self) -> AppResult<()> {
        self.broker.close_queue(&self.name).await
    }
}
