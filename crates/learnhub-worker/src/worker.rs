//! Typed handle over one queue's consumer.

use std::sync::Arc;

use learnhub_broker::BrokerClient;
use learnhub_core::result::AppResult;

/// Handle to the worker bound to one queue.
///
/// Exactly one worker may be bound per queue name within a registry
/// instance.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    queue: String,
    concurrency: usize,
    broker: Arc<dyn BrokerClient>,
}

impl WorkerHandle {
    pub(crate) fn new(queue: String, concurrency: usize, broker: Arc<dyn BrokerClient>) -> Self {
        Self {
            queue,
            concurrency,
            broker,
        }
    }

    /// The queue this worker consumes.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// The worker's configured concurrency.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Stop pulling new jobs without closing the worker.
    pub async fn pause(&self) -> AppResult<()> {
        self.broker.pause_worker(&self.queue).await
    }

    /// Resume pulling after [`Self::pause`].
    pub async fn resume(&self) -> AppResult<()> {
        self.broker.resume_worker(&self.queue).await
    }

    /// Stop the worker, waiting for in-flight jobs.
    pub async fn close(&self) -> AppResult<()> {
        self.broker.close_worker(&self.queue).await
    }
}
