//! Background job orchestration for LearnHub.
//!
//! This crate provides:
//! - A typed job queue registry that creates and caches queue/worker handles
//! - Queue administration: stats, retry, pause/resume/clear/drain
//! - Lifecycle event listener plumbing with catch-and-log dispatch
//! - A cron engine backed by tokio-cron-scheduler
//! - The scheduler that produces the platform's recurring jobs

pub mod cron;
pub mod events;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod worker;

pub use cron::TokioCronEngine;
pub use events::QueueEventListener;
pub use queue::QueueHandle;
pub use registry::{JobQueueRegistry, ManageReport, QueueAction, QueueStats, RetryReport};
pub use scheduler::{HealthReport, Scheduler, SchedulerStatus};
pub use worker::WorkerHandle;
