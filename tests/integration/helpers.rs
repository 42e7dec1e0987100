//! Shared test helpers for integration tests.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use learnhub_broker::{
    BrokerClient, EnqueueOptions, JobContext, JobExecutionError, JobProcessor, MemoryBroker,
};
use learnhub_core::config::queue::QueueConfig;
use learnhub_core::config::worker::WorkerConfig;
use learnhub_core::error::AppError;
use learnhub_core::result::AppResult;
use learnhub_entity::job::{Job, JobStatus, JobTypeConfig, QueueCounts, QueueJobEvent};
use learnhub_worker::{JobQueueRegistry, QueueEventListener};

/// Worker cadence tuned for tests.
pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        enabled: true,
        poll_interval_ms: 10,
        shutdown_grace_seconds: 5,
    }
}

/// Broker + registry pair over an in-memory broker.
pub struct TestHarness {
    pub broker: Arc<MemoryBroker>,
    pub registry: Arc<JobQueueRegistry>,
}

impl TestHarness {
    pub fn new() -> Self {
        let broker = Arc::new(MemoryBroker::new(&fast_worker_config()));
        let registry = Arc::new(JobQueueRegistry::new(
            Arc::clone(&broker) as Arc<dyn BrokerClient>,
            QueueConfig::default(),
        ));
        Self { broker, registry }
    }
}

/// Poll a condition until it holds or the timeout expires.
pub async fn wait_until<F, Fut>(mut condition: F, timeout: Duration)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the job reaches the given status.
pub async fn wait_for_status(
    broker: &Arc<MemoryBroker>,
    queue: &str,
    job_id: Uuid,
    status: JobStatus,
    timeout: Duration,
) {
    wait_until(
        || {
            let broker = Arc::clone(broker);
            let queue = queue.to_string();
            async move {
                matches!(
                    broker.get_job(&queue, job_id).await,
                    Ok(Some(job)) if job.status == status
                )
            }
        },
        timeout,
    )
    .await;
}

/// Processor that fails transiently a fixed number of times, then
/// succeeds.
#[derive(Debug)]
pub struct FlakyProcessor {
    fail_times: u32,
    calls: AtomicU32,
}

impl FlakyProcessor {
    pub fn new(fail_times: u32) -> Self {
        Self {
            fail_times,
            calls: AtomicU32::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }
}

#[async_trait]
impl JobProcessor for FlakyProcessor {
    async fn process(
        &self,
        _job: &Job,
        ctx: &JobContext,
    ) -> Result<Option<serde_json::Value>, JobExecutionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_times {
            return Err(JobExecutionError::Transient("smtp timeout".to_string()));
        }
        ctx.report_progress(100).await.ok();
        Ok(Some(serde_json::json!({ "delivered": true })))
    }
}

/// Processor that completes unless the payload carries `"fail": true`.
#[derive(Debug)]
pub struct PayloadDrivenProcessor;

#[async_trait]
impl JobProcessor for PayloadDrivenProcessor {
    async fn process(
        &self,
        job: &Job,
        _ctx: &JobContext,
    ) -> Result<Option<serde_json::Value>, JobExecutionError> {
        if job.payload.get("fail").and_then(|v| v.as_bool()).unwrap_or(false) {
            Err(JobExecutionError::Transient("requested failure".to_string()))
        } else {
            Ok(Some(serde_json::json!({ "ok": true })))
        }
    }
}

/// Processor that panics on its first call and succeeds afterwards.
#[derive(Debug, Default)]
pub struct PanicOnceProcessor {
    calls: AtomicU32,
}

#[async_trait]
impl JobProcessor for PanicOnceProcessor {
    async fn process(
        &self,
        _job: &Job,
        _ctx: &JobContext,
    ) -> Result<Option<serde_json::Value>, JobExecutionError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("simulated worker crash");
        }
        Ok(None)
    }
}

/// Listener that records every callback it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    pub completed: Mutex<Vec<Uuid>>,
    pub failed: Mutex<Vec<(Uuid, u32, bool)>>,
    pub stalled: AtomicU32,
    pub progress: AtomicU32,
}

#[async_trait]
impl QueueEventListener for RecordingListener {
    async fn on_completed(
        &self,
        _queue: &str,
        job_id: Uuid,
        _result: Option<&serde_json::Value>,
    ) -> AppResult<()> {
        self.completed.lock().unwrap().push(job_id);
        Ok(())
    }

    async fn on_failed(
        &self,
        _queue: &str,
        job_id: Uuid,
        attempts_made: u32,
        _reason: &str,
        retrying: bool,
    ) -> AppResult<()> {
        self.failed.lock().unwrap().push((job_id, attempts_made, retrying));
        Ok(())
    }

    async fn on_progress(&self, _queue: &str, _job_id: Uuid, _progress: u8) -> AppResult<()> {
        self.progress.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_stalled(&self, _queue: &str, _job_id: Uuid, _stalled_count: u32) -> AppResult<()> {
        self.stalled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Broker decorator whose `retry_job` fails for a chosen set of job ids.
#[derive(Debug)]
pub struct FlakyRetryBroker {
    inner: MemoryBroker,
    poisoned: Mutex<HashSet<Uuid>>,
}

impl FlakyRetryBroker {
    pub fn new(inner: MemoryBroker) -> Self {
        Self {
            inner,
            poisoned: Mutex::new(HashSet::new()),
        }
    }

    pub fn poison(&self, job_id: Uuid) {
        self.poisoned.lock().unwrap().insert(job_id);
    }
}

#[async_trait]
impl BrokerClient for FlakyRetryBroker {
    async fn ensure_queue(&self, config: &JobTypeConfig) -> AppResult<()> {
        self.inner.ensure_queue(config).await
    }

    async fn enqueue(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> AppResult<Uuid> {
        self.inner.enqueue(queue, job_name, payload, opts).await
    }

    async fn get_counts(&self, queue: &str) -> AppResult<QueueCounts> {
        self.inner.get_counts(queue).await
    }

    async fn get_job(&self, queue: &str, job_id: Uuid) -> AppResult<Option<Job>> {
        self.inner.get_job(queue, job_id).await
    }

    async fn get_jobs_by_status(&self, queue: &str, status: JobStatus) -> AppResult<Vec<Job>> {
        self.inner.get_jobs_by_status(queue, status).await
    }

    async fn retry_job(&self, queue: &str, job_id: Uuid) -> AppResult<()> {
        if self.poisoned.lock().unwrap().contains(&job_id) {
            return Err(AppError::broker(format!(
                "retry rejected for job '{job_id}'"
            )));
        }
        self.inner.retry_job(queue, job_id).await
    }

    async fn update_progress(&self, queue: &str, job_id: Uuid, progress: u8) -> AppResult<()> {
        self.inner.update_progress(queue, job_id, progress).await
    }

    async fn pause_queue(&self, queue: &str) -> AppResult<()> {
        self.inner.pause_queue(queue).await
    }

    async fn resume_queue(&self, queue: &str) -> AppResult<()> {
        self.inner.resume_queue(queue).await
    }

    async fn clean_queue(&self, queue: &str, status: Option<JobStatus>) -> AppResult<u64> {
        self.inner.clean_queue(queue, status).await
    }

    async fn drain_queue(&self, queue: &str) -> AppResult<u64> {
        self.inner.drain_queue(queue).await
    }

    async fn close_queue(&self, queue: &str) -> AppResult<()> {
        self.inner.close_queue(queue).await
    }

    async fn start_worker(
        &self,
        queue: &str,
        processor: Arc<dyn JobProcessor>,
        concurrency: usize,
    ) -> AppResult<()> {
        self.inner.start_worker(queue, processor, concurrency).await
    }

    async fn pause_worker(&self, queue: &str) -> AppResult<()> {
        self.inner.pause_worker(queue).await
    }

    async fn resume_worker(&self, queue: &str) -> AppResult<()> {
        self.inner.resume_worker(queue).await
    }

    async fn close_worker(&self, queue: &str) -> AppResult<()> {
        self.inner.close_worker(queue).await
    }

    async fn subscribe(&self, queue: &str) -> AppResult<broadcast::Receiver<QueueJobEvent>> {
        self.inner.subscribe(queue).await
    }

    async fn health_check(&self) -> AppResult<bool> {
        self.inner.health_check().await
    }
}
