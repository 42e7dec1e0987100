//! Cron engine trait for pluggable recurring-task backends.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::result::AppResult;

/// Boxed future returned by a scheduled task callback.
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback invoked on every tick of a scheduled task.
///
/// Callbacks must be infallible at this boundary; the scheduler wraps the
/// real work so that errors are caught and logged before reaching the
/// engine.
pub type TaskCallback = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Live status of one scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CronTaskStatus {
    /// The task fires on its cron cadence.
    Scheduled,
    /// The task is registered but its ticks are suppressed.
    Stopped,
}

impl CronTaskStatus {
    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for CronTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trait for cron engine backends.
///
/// The scheduler only talks to this interface, so an alternative engine
/// (for example one that takes a distributed lock before each tick) can be
/// substituted without touching scheduler logic.
#[async_trait]
pub trait CronEngine: Send + Sync + fmt::Debug + 'static {
    /// Register a recurring callback.
    ///
    /// The cron expression is validated here; an invalid expression or
    /// unknown timezone is a setup-time error. The returned handle starts
    /// in the [`CronTaskStatus::Scheduled`] state.
    async fn schedule(
        &self,
        name: &str,
        expression: &str,
        timezone: &str,
        callback: TaskCallback,
    ) -> AppResult<Arc<dyn CronTaskHandle>>;

    /// Stop the engine and drop all registered tasks.
    async fn shutdown(&self) -> AppResult<()>;
}

/// Handle to one registered cron task.
#[async_trait]
pub trait CronTaskHandle: Send + Sync + fmt::Debug + 'static {
    /// Resume ticking. Idempotent.
    async fn start(&self) -> AppResult<()>;

    /// Suppress future ticks without unscheduling the entry. Idempotent.
    async fn stop(&self) -> AppResult<()>;

    /// Current status of the task.
    fn status(&self) -> CronTaskStatus;
}
