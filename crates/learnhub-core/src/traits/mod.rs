//! Core traits defined in `learnhub-core` and implemented by other crates.

pub mod cron;

pub use cron::{CronEngine, CronTaskHandle, CronTaskStatus, TaskCallback};
