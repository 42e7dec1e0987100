//! Lifecycle event listener plumbing.
//!
//! The registry subscribes to each queue's broadcast stream and forwards
//! events to the listener registered for that queue name. Listener errors
//! are caught and logged per invocation; they never abort dispatch.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use learnhub_core::result::AppResult;
use learnhub_entity::job::{JobEvent, QueueJobEvent};

/// Callbacks for one queue's job lifecycle events.
///
/// All methods default to a no-op so listeners implement only what they
/// care about. Returning `Err` is safe: the dispatcher logs it and keeps
/// going.
#[async_trait]
pub trait QueueEventListener: Send + Sync + fmt::Debug {
    /// A job completed successfully.
    async fn on_completed(
        &self,
        queue: &str,
        job_id: Uuid,
        result: Option<&serde_json::Value>,
    ) -> AppResult<()> {
        let _ = (queue, job_id, result);
        Ok(())
    }

    /// A job attempt failed.
    async fn on_failed(
        &self,
        queue: &str,
        job_id: Uuid,
        attempts_made: u32,
        reason: &str,
        retrying: bool,
    ) -> AppResult<()> {
        let _ = (queue, job_id, attempts_made, reason, retrying);
        Ok(())
    }

    /// A job reported progress.
    async fn on_progress(&self, queue: &str, job_id: Uuid, progress: u8) -> AppResult<()> {
        let _ = (queue, job_id, progress);
        Ok(())
    }

    /// An active job stalled.
    async fn on_stalled(&self, queue: &str, job_id: Uuid, stalled_count: u32) -> AppResult<()> {
        let _ = (queue, job_id, stalled_count);
        Ok(())
    }
}

/// Shared listener table: queue name → listener, last registration wins.
pub(crate) type ListenerMap = DashMap<String, Arc<dyn QueueEventListener>>;

/// Forward one event to the queue's listener, if any.
pub(crate) async fn dispatch_event(listeners: &ListenerMap, event: &QueueJobEvent) {
    // Queue-level noise is logged regardless of listener registration.
    match &event.event {
        JobEvent::QueueError { message } => {
            tracing::error!("Queue '{}' reported an error: {}", event.queue, message);
        }
        JobEvent::Stalled {
            job_id,
            stalled_count,
        } => {
            tracing::warn!(
                "Job {} stalled in '{}' (stall #{})",
                job_id,
                event.queue,
                stalled_count
            );
        }
        _ => {}
    }

    let Some(listener) = listeners
        .get(&event.queue)
        .map(|entry| Arc::clone(entry.value()))
    else {
        return;
    };

    let result = match &event.event {
        JobEvent::Completed { job_id, result } => {
            listener
                .on_completed(&event.queue, *job_id, result.as_ref())
                .await
        }
        JobEvent::Failed {
            job_id,
            attempts_made,
            reason,
            retrying,
        } => {
            listener
                .on_failed(&event.queue, *job_id, *attempts_made, reason, *retrying)
                .await
        }
        JobEvent::Progress { job_id, progress } => {
            listener.on_progress(&event.queue, *job_id, *progress).await
        }
        JobEvent::Stalled {
            job_id,
            stalled_count,
        } => {
            listener
                .on_stalled(&event.queue, *job_id, *stalled_count)
                .await
        }
        JobEvent::Waiting { .. } | JobEvent::Active { .. } | JobEvent::QueueError { .. } => {
            return;
        }
    };

    if let Err(err) = result {
        tracing::error!(
            "Event listener for '{}' failed on {:?}: {}",
            event.queue,
            event.event,
            err
        );
    }
}

/// Spawn the dispatch task that drains one queue's event stream.
pub(crate) fn spawn_event_dispatch(
    queue: String,
    mut receiver: broadcast::Receiver<QueueJobEvent>,
    listeners: Arc<ListenerMap>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => dispatch_event(&listeners, &event).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Event stream for '{}' lagged, {} events dropped", queue, missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
