//! # learnhub-core
//!
//! Core crate for the LearnHub background-job platform. Contains the
//! configuration schemas, capability traits, and the unified error system.
//!
//! This crate has **no** internal dependencies on other LearnHub crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;

pub use error::AppError;
pub use result::AppResult;
