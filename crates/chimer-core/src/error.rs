//! Error taxonomy shared across the workspace.

use thiserror::Error;
use uuid::Uuid;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed schedule expression or out-of-range repeat interval.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Header JSON failed to parse. Non-fatal at execution time: the
    /// invoker falls back to an empty header map.
    #[error("Invalid headers: {0}")]
    InvalidHeaders(String),

    /// Job id unknown to the store.
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    /// Manual trigger on a disabled job.
    #[error("Job {0} is not active")]
    Inactive(Uuid),

    /// Manual trigger while a sequential job is in flight (or a parallel
    /// job is saturated).
    #[error("Job {0} is already running")]
    AlreadyRunning(Uuid),

    /// Manual trigger throttled by the per-job limiter.
    #[error("Rate limited, retry in {retry_after:.1}s")]
    RateLimited { retry_after: f64 },

    /// Network-layer failure talking to the job's endpoint.
    #[error("Network error: {0}")]
    Transport(String),

    /// A completed HTTP response the invoker did not accept.
    #[error("HTTP {code}: {reason}")]
    Http { code: u16, reason: String },

    /// Persistence failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid environment configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Request payload rejected at the API boundary.
    #[error("{0}")]
    Validation(String),
}

impl Error {
    /// Wrap any persistence-layer failure.
    pub fn store(err: impl std::fmt::Display) -> Self {
        Error::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_schedule_message() {
        let err = Error::InvalidSchedule("Minimum interval is 5 seconds".into());
        assert!(err.to_string().contains("Minimum interval is 5 seconds"));
    }

    #[test]
    fn rate_limited_renders_one_decimal() {
        let err = Error::RateLimited { retry_after: 7.3 };
        assert_eq!(err.to_string(), "Rate limited, retry in 7.3s");
    }

    #[test]
    fn http_error_shape() {
        let err = Error::Http {
            code: 404,
            reason: "Not Found".into(),
        };
        assert_eq!(err.to_string(), "HTTP 404: Not Found");
    }
}
