//! # chimer-scheduler
//!
//! The scheduling engine and execution pipeline: the two schedule
//! dialects, the in-memory job registry with its tick loop, the retrying
//! HTTP invoker, and the retention sweeper.
//!
//! ## Architecture
//! ```text
//! tick loop (500 ms interval)
//!   └── due entries → gating (sequential / parallel) → Fire
//!         └── spawned task: HTTP invoker → execution log → finalizer
//! retention sweeper (cron "0 0 * * *")
//!   └── deletes logs older than the retention horizon
//! ```

pub mod cron;
pub mod engine;
pub mod invoker;
pub mod retention;
pub mod schedule;

pub use cron::CronExpr;
pub use engine::{
    bootstrap, execute_now, spawn_engine, EntryStatus, JobStatusView, SchedulerEngine,
};
pub use invoker::{HttpInvoker, Invoke, InvokeOutcome};
pub use retention::{spawn_sweeper, RetentionSweeper};
pub use schedule::Schedule;
