//! # chimer-core
//!
//! Shared foundation for the chimer scheduler: the persisted domain model
//! (`Job`, `ExecutionLog`), the error taxonomy, and environment-driven
//! configuration. Everything else in the workspace builds on this crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, DbConfig};
pub use error::{Error, Result};
pub use types::{
    ExecutionLog, ExecutionMode, ExecutionStatus, HttpMethod, Job, ScheduleType,
};
