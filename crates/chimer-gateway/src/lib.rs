//! # chimer-gateway
//!
//! REST surface over the scheduler core: job CRUD, manual triggers with
//! a per-job rate limit, log queries and stats, and data export/import.
//! CRUD handlers double as the reconciler, translating API lifecycle
//! events into engine calls.

pub mod data;
pub mod ratelimit;
pub mod routes;
pub mod server;

pub use ratelimit::TriggerLimiter;
pub use server::{build_router, serve, AppState};
