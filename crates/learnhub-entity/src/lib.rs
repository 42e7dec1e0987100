//! # learnhub-entity
//!
//! Domain entity models for the LearnHub background-job platform: the job
//! record, its status machine, per-type queue policy, typed payloads, and
//! lifecycle events.

pub mod job;
