//! # learnhub-broker
//!
//! The job broker seam for LearnHub. [`client::BrokerClient`] is the
//! capability interface every durable, at-least-once job store must
//! implement; [`memory::MemoryBroker`] is the single-process reference
//! implementation used by the daemon's default configuration and the
//! integration tests.

pub mod client;
pub mod memory;
pub mod processor;

pub use client::{BrokerClient, EnqueueOptions};
pub use memory::MemoryBroker;
pub use processor::{JobContext, JobExecutionError, JobProcessor};
