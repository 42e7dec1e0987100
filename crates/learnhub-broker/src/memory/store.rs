//! In-memory broker implementing the full job state machine.
//!
//! Single-process reference implementation of [`BrokerClient`]: waiting →
//! active → completed/failed with exponential retry backoff, delayed-job
//! promotion, stalled-job recovery, pause/resume gating, and graceful
//! worker close. Mutual exclusion per job is guaranteed by the waiting
//! list: a job id is popped exactly once per attempt.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time;
use tracing;
use uuid::Uuid;

use learnhub_core::config::worker::WorkerConfig;
use learnhub_core::error::AppError;
use learnhub_core::result::AppResult;
use learnhub_entity::job::{Job, JobEvent, JobStatus, JobTypeConfig, QueueCounts, QueueJobEvent};

use crate::client::{BrokerClient, EnqueueOptions};
use crate::processor::{JobContext, JobExecutionError, JobProcessor};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// In-memory job broker.
///
/// Cheap to clone; all clones share the same queue state.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    queues: DashMap<String, Arc<QueueState>>,
    workers: DashMap<String, Arc<WorkerState>>,
    poll_interval: Duration,
    shutdown_grace: Duration,
}

#[derive(Debug)]
struct QueueState {
    config: JobTypeConfig,
    table: Mutex<JobTable>,
    paused: AtomicBool,
    closed: AtomicBool,
    events: broadcast::Sender<QueueJobEvent>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Default)]
struct JobTable {
    jobs: HashMap<Uuid, Job>,
    waiting: VecDeque<Uuid>,
    heartbeats: HashMap<Uuid, Instant>,
}

#[derive(Debug)]
struct WorkerState {
    paused: AtomicBool,
    cancel: watch::Sender<bool>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl QueueState {
    fn emit(&self, event: JobEvent) {
        // Send fails only when nobody is subscribed, which is fine.
        let _ = self
            .events
            .send(QueueJobEvent::new(self.config.name.clone(), event));
    }
}

/// The status a job reports to callers, folding queue pause state in:
/// waiting jobs of a paused queue report as `Paused`.
fn effective_status(job: &Job, queue_paused: bool) -> JobStatus {
    if job.status == JobStatus::Waiting && queue_paused {
        JobStatus::Paused
    } else {
        job.status
    }
}

impl MemoryBroker {
    /// Create a broker with the given worker cadence settings.
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                queues: DashMap::new(),
                workers: DashMap::new(),
                poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
                shutdown_grace: Duration::from_secs(config.shutdown_grace_seconds),
            }),
        }
    }

    fn queue(&self, name: &str) -> AppResult<Arc<QueueState>> {
        self.inner
            .queues
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AppError::not_found(format!("queue '{name}' is not registered")))
    }

    /// Pop the next runnable waiting job and mark it active.
    fn claim(&self, state: &Arc<QueueState>) -> Option<Job> {
        let claimed = {
            let mut table = state.table.lock().unwrap();
            let JobTable {
                jobs,
                waiting,
                heartbeats,
            } = &mut *table;

            let mut claimed = None;
            while let Some(id) = waiting.pop_front() {
                // Ids of cleaned/drained jobs may linger in the list.
                if let Some(job) = jobs.get_mut(&id) {
                    job.status = JobStatus::Active;
                    job.attempts_made += 1;
                    job.started_at = Some(Utc::now());
                    heartbeats.insert(id, Instant::now());
                    claimed = Some(job.clone());
                    break;
                }
            }
            claimed
        };

        if let Some(job) = &claimed {
            state.emit(JobEvent::Active { job_id: job.id });
        }
        claimed
    }

    /// Record a successful attempt.
    fn complete(&self, state: &Arc<QueueState>, job_id: Uuid, result: Option<serde_json::Value>) {
        {
            let mut table = state.table.lock().unwrap();
            table.heartbeats.remove(&job_id);
            let Some(job) = table.jobs.get_mut(&job_id) else {
                tracing::warn!("Completed job {} no longer exists in '{}'", job_id, state.config.name);
                return;
            };
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.result = result.clone();
            job.finished_at = Some(Utc::now());
            if state.config.remove_on_complete {
                table.jobs.remove(&job_id);
            }
        }
        state.emit(JobEvent::Completed { job_id, result });
    }

    /// Record a failed attempt, scheduling a backoff retry while attempts
    /// remain (unless the failure is permanent).
    fn fail(&self, state: &Arc<QueueState>, job_id: Uuid, reason: String, allow_retry: bool) {
        let event = {
            let mut table = state.table.lock().unwrap();
            table.heartbeats.remove(&job_id);
            let Some(job) = table.jobs.get_mut(&job_id) else {
                tracing::warn!("Failed job {} no longer exists in '{}'", job_id, state.config.name);
                return;
            };
            job.failure_reason = Some(reason.clone());

            let retrying = allow_retry && job.attempts_made < state.config.max_retries;
            if retrying {
                // Exponential backoff: base * 2^(attempt - 1), capped to
                // keep the shift in range.
                let exponent = job.attempts_made.saturating_sub(1).min(20);
                let delay_ms = state.config.backoff_delay_ms.saturating_mul(1 << exponent);
                job.status = JobStatus::Delayed;
                job.delay_until = Some(Utc::now() + chrono::Duration::milliseconds(delay_ms as i64));
            } else {
                job.status = JobStatus::Failed;
                job.finished_at = Some(Utc::now());
            }

            let event = JobEvent::Failed {
                job_id,
                attempts_made: job.attempts_made,
                reason,
                retrying,
            };
            if !retrying && state.config.remove_on_fail {
                table.jobs.remove(&job_id);
            }
            event
        };
        state.emit(event);
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(&WorkerConfig::default())
    }
}

/// Promote delayed jobs whose due time has arrived.
fn promote_due(state: &Arc<QueueState>) {
    let promoted = {
        let mut table = state.table.lock().unwrap();
        let JobTable { jobs, waiting, .. } = &mut *table;
        let now = Utc::now();
        let mut promoted = Vec::new();
        for job in jobs.values_mut() {
            if job.status == JobStatus::Delayed
                && job.delay_until.map(|due| due <= now).unwrap_or(true)
            {
                job.status = JobStatus::Waiting;
                job.delay_until = None;
                waiting.push_back(job.id);
                promoted.push(job.id);
            }
        }
        promoted
    };

    for job_id in promoted {
        state.emit(JobEvent::Waiting { job_id });
    }
}

/// Requeue active jobs whose heartbeat went silent; fail them once the
/// stall limit is reached.
fn reap_stalled(state: &Arc<QueueState>) {
    let interval = Duration::from_millis(state.config.stalled_interval_ms);
    let mut events = Vec::new();
    {
        let mut table = state.table.lock().unwrap();
        let JobTable {
            jobs,
            waiting,
            heartbeats,
        } = &mut *table;

        let stale: Vec<Uuid> = jobs
            .values()
            .filter(|job| job.status == JobStatus::Active)
            .filter(|job| {
                heartbeats
                    .get(&job.id)
                    .map(|seen| seen.elapsed() > interval)
                    .unwrap_or(true)
            })
            .map(|job| job.id)
            .collect();

        for id in stale {
            heartbeats.remove(&id);
            let Some(job) = jobs.get_mut(&id) else { continue };
            job.stalled_count += 1;
            events.push(JobEvent::Stalled {
                job_id: id,
                stalled_count: job.stalled_count,
            });
            if job.stalled_count <= state.config.max_stalled_count {
                job.status = JobStatus::Waiting;
                job.started_at = None;
                waiting.push_back(id);
                events.push(JobEvent::Waiting { job_id: id });
            } else {
                job.status = JobStatus::Failed;
                job.failure_reason = Some("job stalled beyond the allowed limit".to_string());
                job.finished_at = Some(Utc::now());
                events.push(JobEvent::Failed {
                    job_id: id,
                    attempts_made: job.attempts_made,
                    reason: "job stalled beyond the allowed limit".to_string(),
                    retrying: false,
                });
                if state.config.remove_on_fail {
                    jobs.remove(&id);
                }
            }
        }
    }

    for event in events {
        state.emit(event);
    }
}

async fn run_maintenance(state: Arc<QueueState>, tick: Duration) {
    loop {
        time::sleep(tick).await;
        if state.closed.load(Ordering::Relaxed) {
            break;
        }
        promote_due(&state);
        reap_stalled(&state);
    }
}

/// Worker loop: poll the waiting list and dispatch up to `concurrency`
/// jobs at a time until cancelled, then wait for in-flight jobs.
async fn run_worker(
    broker: MemoryBroker,
    state: Arc<QueueState>,
    worker: Arc<WorkerState>,
    processor: Arc<dyn JobProcessor>,
    mut cancel: watch::Receiver<bool>,
) {
    let poll_interval = broker.inner.poll_interval;
    let queue_name = state.config.name.clone();

    tracing::info!(
        "Worker for '{}' started with concurrency={}",
        queue_name,
        worker.concurrency
    );

    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    tracing::info!("Worker for '{}' received shutdown signal", queue_name);
                    break;
                }
            }
            _ = time::sleep(poll_interval) => {
                loop {
                    if state.closed.load(Ordering::Relaxed)
                        || state.paused.load(Ordering::Relaxed)
                        || worker.paused.load(Ordering::Relaxed)
                    {
                        break;
                    }
                    let permit = match Arc::clone(&worker.semaphore).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    match broker.claim(&state) {
                        Some(job) => dispatch(
                            broker.clone(),
                            Arc::clone(&state),
                            Arc::clone(&processor),
                            job,
                            permit,
                        ),
                        None => break,
                    }
                }
            }
        }
    }

    tracing::info!("Worker for '{}' waiting for in-flight jobs...", queue_name);
    let permits = worker.concurrency as u32;
    let _ = time::timeout(
        broker.inner.shutdown_grace,
        worker.semaphore.acquire_many(permits),
    )
    .await;
    tracing::info!("Worker for '{}' shut down", queue_name);
}

/// Execute one claimed job on its own task, renewing the heartbeat while
/// the processor runs. A processor panic stops renewal and leaves the job
/// to the stalled reaper.
fn dispatch(
    broker: MemoryBroker,
    state: Arc<QueueState>,
    processor: Arc<dyn JobProcessor>,
    job: Job,
    permit: tokio::sync::OwnedSemaphorePermit,
) {
    tokio::spawn(async move {
        let _permit = permit;
        let job_id = job.id;

        tracing::debug!(
            "Processing job: id={}, name='{}', attempt={}/{}",
            job_id,
            job.name,
            job.attempts_made,
            job.max_retries
        );

        let ctx = JobContext::new(
            job.queue.clone(),
            job_id,
            Arc::new(broker.clone()) as Arc<dyn BrokerClient>,
        );

        let renew_state = Arc::clone(&state);
        let renew_interval =
            Duration::from_millis((state.config.stalled_interval_ms / 3).max(10));
        let renew = tokio::spawn(async move {
            loop {
                time::sleep(renew_interval).await;
                renew_state
                    .table
                    .lock()
                    .unwrap()
                    .heartbeats
                    .insert(job_id, Instant::now());
            }
        });

        let outcome = AssertUnwindSafe(processor.process(&job, &ctx))
            .catch_unwind()
            .await;
        renew.abort();

        match outcome {
            Ok(Ok(result)) => {
                broker.complete(&state, job_id, result);
                tracing::debug!("Job {} completed", job_id);
            }
            Ok(Err(JobExecutionError::Transient(msg))) => {
                tracing::warn!("Job {} failed (transient): {}", job_id, msg);
                broker.fail(&state, job_id, msg, true);
            }
            Ok(Err(JobExecutionError::Permanent(msg))) => {
                tracing::error!("Job {} failed permanently: {}", job_id, msg);
                broker.fail(&state, job_id, msg, false);
            }
            Ok(Err(JobExecutionError::Internal(err))) => {
                let msg = err.to_string();
                tracing::error!("Job {} internal error: {}", job_id, msg);
                broker.fail(&state, job_id, msg, false);
            }
            Err(_) => {
                // Stop the heartbeat so the stalled reaper recovers the job.
                tracing::error!("Job {} processor panicked", job_id);
                state.table.lock().unwrap().heartbeats.remove(&job_id);
            }
        }
    });
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn ensure_queue(&self, config: &JobTypeConfig) -> AppResult<()> {
        config.validate()?;
        if self.inner.queues.contains_key(&config.name) {
            return Ok(());
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = Arc::new(QueueState {
            config: config.clone(),
            table: Mutex::new(JobTable::default()),
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events,
            maintenance: Mutex::new(None),
        });

        let tick = self
            .inner
            .poll_interval
            .min(Duration::from_millis((config.stalled_interval_ms / 2).max(10)));
        let handle = tokio::spawn(run_maintenance(Arc::clone(&state), tick));
        *state.maintenance.lock().unwrap() = Some(handle);

        self.inner
            .queues
            .insert(config.name.clone(), Arc::clone(&state));
        tracing::debug!("Queue '{}' registered", config.name);
        Ok(())
    }

    async fn enqueue(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> AppResult<Uuid> {
        let state = self.queue(queue)?;
        let now = Utc::now();
        let delayed = opts.delay.is_some();

        let job = Job {
            id: Uuid::new_v4(),
            name: job_name.to_string(),
            queue: queue.to_string(),
            payload,
            status: if delayed {
                JobStatus::Delayed
            } else {
                JobStatus::Waiting
            },
            attempts_made: 0,
            max_retries: state.config.max_retries,
            progress: 0,
            failure_reason: None,
            result: None,
            stalled_count: 0,
            created_at: now,
            started_at: None,
            finished_at: None,
            delay_until: opts
                .delay
                .map(|d| now + chrono::Duration::milliseconds(d.as_millis() as i64)),
        };
        let job_id = job.id;

        {
            let mut table = state.table.lock().unwrap();
            table.jobs.insert(job_id, job);
            if !delayed {
                table.waiting.push_back(job_id);
            }
        }
        if !delayed {
            state.emit(JobEvent::Waiting { job_id });
        }

        tracing::debug!(
            "Enqueued job: id={}, name='{}', queue='{}', delayed={}",
            job_id,
            job_name,
            queue,
            delayed
        );
        Ok(job_id)
    }

    async fn get_counts(&self, queue: &str) -> AppResult<QueueCounts> {
        let state = self.queue(queue)?;
        let paused = state.paused.load(Ordering::Relaxed);
        let table = state.table.lock().unwrap();

        let mut counts = QueueCounts::default();
        for job in table.jobs.values() {
            match effective_status(job, paused) {
                JobStatus::Waiting => counts.waiting += 1,
                JobStatus::Active => counts.active += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Delayed => counts.delayed += 1,
                JobStatus::Paused => counts.paused += 1,
                // Stalled jobs are requeued immediately; the status never
                // rests in the table.
                JobStatus::Stalled => counts.waiting += 1,
            }
        }
        Ok(counts)
    }

    async fn get_job(&self, queue: &str, job_id: Uuid) -> AppResult<Option<Job>> {
        let state = self.queue(queue)?;
        let paused = state.paused.load(Ordering::Relaxed);
        let table = state.table.lock().unwrap();
        Ok(table.jobs.get(&job_id).map(|job| {
            let mut snapshot = job.clone();
            snapshot.status = effective_status(job, paused);
            snapshot
        }))
    }

    async fn get_jobs_by_status(&self, queue: &str, status: JobStatus) -> AppResult<Vec<Job>> {
        let state = self.queue(queue)?;
        let paused = state.paused.load(Ordering::Relaxed);
        let table = state.table.lock().unwrap();
        Ok(table
            .jobs
            .values()
            .filter(|job| effective_status(job, paused) == status)
            .cloned()
            .collect())
    }

    async fn retry_job(&self, queue: &str, job_id: Uuid) -> AppResult<()> {
        let state = self.queue(queue)?;
        {
            let mut table = state.table.lock().unwrap();
            let JobTable { jobs, waiting, .. } = &mut *table;
            let job = jobs.get_mut(&job_id).ok_or_else(|| {
                AppError::not_found(format!("job '{job_id}' not found in queue '{queue}'"))
            })?;
            if !job.status.can_retry() {
                return Err(AppError::invalid_action(format!(
                    "job '{job_id}' is not in a failed state"
                )));
            }
            job.status = JobStatus::Waiting;
            job.finished_at = None;
            waiting.push_back(job_id);
        }
        state.emit(JobEvent::Waiting { job_id });
        Ok(())
    }

    async fn update_progress(&self, queue: &str, job_id: Uuid, progress: u8) -> AppResult<()> {
        let state = self.queue(queue)?;
        {
            let mut table = state.table.lock().unwrap();
            let JobTable {
                jobs, heartbeats, ..
            } = &mut *table;
            let job = jobs.get_mut(&job_id).ok_or_else(|| {
                AppError::not_found(format!("job '{job_id}' not found in queue '{queue}'"))
            })?;
            job.progress = progress.min(100);
            heartbeats.insert(job_id, Instant::now());
        }
        state.emit(JobEvent::Progress {
            job_id,
            progress: progress.min(100),
        });
        Ok(())
    }

    async fn pause_queue(&self, queue: &str) -> AppResult<()> {
        let state = self.queue(queue)?;
        state.paused.store(true, Ordering::Relaxed);
        tracing::info!("Queue '{}' paused", queue);
        Ok(())
    }

    async fn resume_queue(&self, queue: &str) -> AppResult<()> {
        let state = self.queue(queue)?;
        state.paused.store(false, Ordering::Relaxed);
        tracing::info!("Queue '{}' resumed", queue);
        Ok(())
    }

    async fn clean_queue(&self, queue: &str, status: Option<JobStatus>) -> AppResult<u64> {
        let state = self.queue(queue)?;
        let paused = state.paused.load(Ordering::Relaxed);
        let mut table = state.table.lock().unwrap();
        let JobTable {
            jobs,
            waiting,
            heartbeats,
        } = &mut *table;

        let targets: Vec<Uuid> = jobs
            .values()
            .filter(|job| match status {
                Some(wanted) => effective_status(job, paused) == wanted,
                None => matches!(
                    job.status,
                    JobStatus::Completed | JobStatus::Failed | JobStatus::Waiting | JobStatus::Active
                ),
            })
            .map(|job| job.id)
            .collect();

        for id in &targets {
            jobs.remove(id);
            heartbeats.remove(id);
        }
        waiting.retain(|id| jobs.contains_key(id));

        tracing::info!("Cleaned {} jobs from '{}'", targets.len(), queue);
        Ok(targets.len() as u64)
    }

    async fn drain_queue(&self, queue: &str) -> AppResult<u64> {
        let state = self.queue(queue)?;
        let mut table = state.table.lock().unwrap();
        let JobTable { jobs, waiting, .. } = &mut *table;

        let before = jobs.len();
        jobs.retain(|_, job| job.status != JobStatus::Waiting);
        let removed = (before - jobs.len()) as u64;
        waiting.clear();

        tracing::info!("Drained {} waiting jobs from '{}'", removed, queue);
        Ok(removed)
    }

    async fn close_queue(&self, queue: &str) -> AppResult<()> {
        let Some((_, state)) = self.inner.queues.remove(queue) else {
            return Ok(());
        };
        state.closed.store(true, Ordering::Relaxed);
        if let Some(handle) = state.maintenance.lock().unwrap().take() {
            handle.abort();
        }
        tracing::info!("Queue '{}' closed", queue);
        Ok(())
    }

    async fn start_worker(
        &self,
        queue: &str,
        processor: Arc<dyn JobProcessor>,
        concurrency: usize,
    ) -> AppResult<()> {
        let state = self.queue(queue)?;
        let concurrency = concurrency.max(1);

        let (cancel, cancel_rx) = watch::channel(false);
        let worker = Arc::new(WorkerState {
            paused: AtomicBool::new(false),
            cancel,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            handle: Mutex::new(None),
        });

        match self.inner.workers.entry(queue.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(AppError::duplicate_registration(format!(
                    "a worker is already bound to queue '{queue}'"
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&worker));
            }
        }

        let handle = tokio::spawn(run_worker(
            self.clone(),
            state,
            Arc::clone(&worker),
            processor,
            cancel_rx,
        ));
        *worker.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn pause_worker(&self, queue: &str) -> AppResult<()> {
        let worker = self
            .inner
            .workers
            .get(queue)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AppError::not_found(format!("no worker bound to queue '{queue}'")))?;
        worker.paused.store(true, Ordering::Relaxed);
        tracing::info!("Worker for '{}' paused", queue);
        Ok(())
    }

    async fn resume_worker(&self, queue: &str) -> AppResult<()> {
        let worker = self
            .inner
            .workers
            .get(queue)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AppError::not_found(format!("no worker bound to queue '{queue}'")))?;
        worker.paused.store(false, Ordering::Relaxed);
        tracing::info!("Worker for '{}' resumed", queue);
        Ok(())
    }

    async fn close_worker(&self, queue: &str) -> AppResult<()> {
        let Some((_, worker)) = self.inner.workers.remove(queue) else {
            return Ok(());
        };
        let _ = worker.cancel.send(true);
        let handle = worker.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!("Worker task for '{}' ended abnormally: {}", queue, err);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> AppResult<broadcast::Receiver<QueueJobEvent>> {
        let state = self.queue(queue)?;
        Ok(state.events.subscribe())
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
}
