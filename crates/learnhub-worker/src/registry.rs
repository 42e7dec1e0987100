//! Typed job queue registry.
//!
//! One registry per process: constructed once at startup with its broker
//! and queue defaults, then passed by `Arc` to every consumer. Queue and
//! worker handles are created on demand and cached by resolved queue name.

use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use learnhub_broker::{BrokerClient, JobProcessor};
use learnhub_core::config::queue::QueueConfig;
use learnhub_core::error::AppError;
use learnhub_core::result::AppResult;
use learnhub_entity::job::{Job, JobStatus, JobType, JobTypeConfig, JobTypeOverrides, QueueCounts};

use crate::events::{spawn_event_dispatch, ListenerMap, QueueEventListener};
use crate::queue::QueueHandle;
use crate::worker::WorkerHandle;

/// Administrative action on one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAction {
    /// Stop dispatching waiting jobs.
    Pause,
    /// Resume dispatching.
    Resume,
    /// Remove job records, optionally filtered by status.
    Clear,
    /// Remove all waiting jobs without processing them.
    Drain,
}

impl QueueAction {
    /// Return the action as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Clear => "clear",
            Self::Drain => "drain",
        }
    }
}

impl FromStr for QueueAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "clear" => Ok(Self::Clear),
            "drain" => Ok(Self::Drain),
            other => Err(AppError::invalid_action(format!(
                "unknown queue action '{other}' (expected pause, resume, clear, or drain)"
            ))),
        }
    }
}

/// Per-queue counts row returned by [`JobQueueRegistry::get_all_queue_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Queue name.
    pub name: String,
    /// Job counts; zeroed when the broker could not be queried.
    #[serde(flatten)]
    pub counts: QueueCounts,
}

/// Outcome of a retry request.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RetryReport {
    /// Number of jobs successfully moved back to waiting.
    pub retried_count: u64,
}

/// Outcome of a management action.
#[derive(Debug, Clone, Serialize)]
pub struct ManageReport {
    /// Whether the action was applied.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
}

/// Factory and cache for queue/worker handles plus bulk administration.
#[derive(Debug)]
pub struct JobQueueRegistry {
    broker: Arc<dyn BrokerClient>,
    queue_config: QueueConfig,
    queues: DashMap<String, Arc<QueueHandle>>,
    workers: DashMap<String, Arc<WorkerHandle>>,
    listeners: Arc<ListenerMap>,
    dispatchers: DashMap<String, JoinHandle<()>>,
}

impl JobQueueRegistry {
    /// Create a registry over the given broker and queue defaults.
    pub fn new(broker: Arc<dyn BrokerClient>, queue_config: QueueConfig) -> Self {
        Self {
            broker,
            queue_config,
            queues: DashMap::new(),
            workers: DashMap::new(),
            listeners: Arc::new(DashMap::new()),
            dispatchers: DashMap::new(),
        }
    }

    /// Resolve the queue name for a job type under this registry's prefix.
    pub fn queue_name(&self, job_type: JobType) -> String {
        job_type.queue_name(&self.queue_config.prefix)
    }

    /// Create (or return the cached) queue handle for a job type.
    ///
    /// Idempotent: repeated calls with the same type return the identical
    /// handle; overrides only apply on first creation. First creation also
    /// subscribes the queue's event stream and starts the listener
    /// dispatcher.
    pub async fn create_queue(
        &self,
        job_type: JobType,
        overrides: Option<JobTypeOverrides>,
    ) -> AppResult<Arc<QueueHandle>> {
        let name = self.queue_name(job_type);
        if let Some(handle) = self.queues.get(&name) {
            return Ok(Arc::clone(handle.value()));
        }

        let mut config = JobTypeConfig::for_type(job_type, &self.queue_config);
        if let Some(overrides) = &overrides {
            config = overrides.apply(config);
        }
        config.validate()?;

        self.broker.ensure_queue(&config).await?;
        let receiver = self.broker.subscribe(&name).await?;

        let handle = Arc::new(QueueHandle::new(
            name.clone(),
            config,
            Arc::clone(&self.broker),
        ));
        match self.queues.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                // Lost a creation race; the first handle wins.
                return Ok(Arc::clone(existing.get()));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&handle));
            }
        }

        let dispatcher = spawn_event_dispatch(name.clone(), receiver, Arc::clone(&self.listeners));
        self.dispatchers.insert(name.clone(), dispatcher);

        tracing::info!("Queue '{}' created", name);
        Ok(handle)
    }

    /// Bind a processor to a job type's queue.
    ///
    /// Creates the queue first if needed. Fails with a duplicate
    /// registration error if a worker already exists for the resolved
    /// queue name.
    pub async fn create_worker(
        &self,
        job_type: JobType,
        processor: Arc<dyn JobProcessor>,
        overrides: Option<JobTypeOverrides>,
    ) -> AppResult<Arc<WorkerHandle>> {
        let queue = self.create_queue(job_type, overrides).await?;
        let name = queue.name().to_string();

        if self.workers.contains_key(&name) {
            return Err(AppError::duplicate_registration(format!(
                "a worker is already registered for queue '{name}'"
            )));
        }

        let concurrency = queue.config().concurrency;
        self.broker.start_worker(&name, processor, concurrency).await?;

        let handle = Arc::new(WorkerHandle::new(
            name.clone(),
            concurrency,
            Arc::clone(&self.broker),
        ));
        self.workers.insert(name.clone(), Arc::clone(&handle));

        tracing::info!("Worker created for '{}' (concurrency={})", name, concurrency);
        Ok(handle)
    }

    /// Register the event listener for a queue name.
    ///
    /// Replaces any existing listener; the queue does not need to exist
    /// yet.
    pub fn register_event_listener(
        &self,
        queue_name: &str,
        listener: Arc<dyn QueueEventListener>,
    ) {
        self.listeners.insert(queue_name.to_string(), listener);
        tracing::debug!("Event listener registered for '{}'", queue_name);
    }

    /// Counts for every known queue, queried concurrently.
    ///
    /// A broker error for one queue is logged and reported as a zeroed
    /// row rather than failing the whole call.
    pub async fn get_all_queue_stats(&self) -> Vec<QueueStats> {
        let queues: Vec<Arc<QueueHandle>> = self
            .queues
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        join_all(queues.into_iter().map(|queue| async move {
            match queue.counts().await {
                Ok(counts) => QueueStats {
                    name: queue.name().to_string(),
                    counts,
                },
                Err(err) => {
                    tracing::error!("Failed to fetch counts for '{}': {}", queue.name(), err);
                    QueueStats {
                        name: queue.name().to_string(),
                        counts: QueueCounts::default(),
                    }
                }
            }
        }))
        .await
    }

    /// Retry failed jobs in a queue.
    ///
    /// With a job id, retries that single job if it is currently failed
    /// (silent no-op otherwise). Without one, retries every currently
    /// failed job independently, continuing past per-job failures.
    pub async fn retry_failed_jobs(
        &self,
        queue_name: &str,
        job_id: Option<Uuid>,
    ) -> AppResult<RetryReport> {
        self.known_queue(queue_name)?;

        match job_id {
            Some(id) => {
                let job = self.broker.get_job(queue_name, id).await?.ok_or_else(|| {
                    AppError::not_found(format!("job '{id}' not found in queue '{queue_name}'"))
                })?;
                if !job.status.can_retry() {
                    tracing::debug!(
                        "Job {} in '{}' is {}, not failed; skipping retry",
                        id,
                        queue_name,
                        job.status
                    );
                    return Ok(RetryReport { retried_count: 0 });
                }
                self.broker.retry_job(queue_name, id).await?;
                Ok(RetryReport { retried_count: 1 })
            }
            None => {
                let failed = self
                    .broker
                    .get_jobs_by_status(queue_name, JobStatus::Failed)
                    .await?;
                let mut retried_count = 0;
                for job in failed {
                    match self.broker.retry_job(queue_name, job.id).await {
                        Ok(()) => retried_count += 1,
                        Err(err) => {
                            tracing::error!(
                                "Failed to retry job {} in '{}': {}",
                                job.id,
                                queue_name,
                                err
                            );
                        }
                    }
                }
                Ok(RetryReport { retried_count })
            }
        }
    }

    /// Apply an administrative action to a queue.
    pub async fn manage_queue(
        &self,
        queue_name: &str,
        action: QueueAction,
        status: Option<JobStatus>,
    ) -> AppResult<ManageReport> {
        let queue = self.known_queue(queue_name)?;

        let message = match action {
            QueueAction::Pause => {
                queue.pause().await?;
                format!("queue '{queue_name}' paused")
            }
            QueueAction::Resume => {
                queue.resume().await?;
                format!("queue '{queue_name}' resumed")
            }
            QueueAction::Clear => {
                let removed = queue.clean(status).await?;
                match status {
                    Some(status) => {
                        format!("removed {removed} {status} jobs from '{queue_name}'")
                    }
                    None => format!("removed {removed} jobs from '{queue_name}'"),
                }
            }
            QueueAction::Drain => {
                let removed = queue.drain().await?;
                format!("drained {removed} waiting jobs from '{queue_name}'")
            }
        };

        tracing::info!("Queue management: {}", message);
        Ok(ManageReport {
            success: true,
            message,
        })
    }

    /// Full snapshot of one job.
    pub async fn get_job_details(&self, queue_name: &str, job_id: Uuid) -> AppResult<Job> {
        self.known_queue(queue_name)?;
        self.broker
            .get_job(queue_name, job_id)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!(
                    "job '{job_id}' not found in queue '{queue_name}'"
                ))
            })
    }

    /// Check that the broker is reachable.
    pub async fn health_check(&self) -> bool {
        match self.broker.health_check().await {
            Ok(healthy) => healthy,
            Err(err) => {
                tracing::error!("Broker health check failed: {}", err);
                false
            }
        }
    }

    /// Number of queues currently registered.
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Number of workers currently bound.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Close every worker, then every queue, then clear all internal maps.
    ///
    /// Workers close first so in-flight consumers never lose their backing
    /// queue mid-shutdown. Individual close failures are logged, never
    /// propagated, and never stop the remaining closes.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job queue registry...");

        let workers: Vec<Arc<WorkerHandle>> = self
            .workers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let results = join_all(workers.iter().map(|worker| worker.close())).await;
        for (worker, result) in workers.iter().zip(results) {
            if let Err(err) = result {
                tracing::error!("Failed to close worker for '{}': {}", worker.queue(), err);
            }
        }

        let queues: Vec<Arc<QueueHandle>> = self
            .queues
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let results = join_all(queues.iter().map(|queue| queue.close())).await;
        for (queue, result) in queues.iter().zip(results) {
            if let Err(err) = result {
                tracing::error!("Failed to close queue '{}': {}", queue.name(), err);
            }
        }

        for entry in self.dispatchers.iter() {
            entry.value().abort();
        }
        self.dispatchers.clear();
        self.queues.clear();
        self.workers.clear();
        self.listeners.clear();

        tracing::info!("Job queue registry shut down");
    }

    fn known_queue(&self, queue_name: &str) -> AppResult<Arc<QueueHandle>> {
        self.queues
            .get(queue_name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AppError::not_found(format!("queue '{queue_name}' is not registered")))
    }
}
