//! Query-side types consumed by the engine, the sweeper, and the API layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use chimer_core::types::ExecutionStatus;

/// Filter over execution logs. All fields are conjunctive; `None` means
/// "don't care". Text filters are case-insensitive contains.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub job_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
    pub triggered_manually: Option<bool>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub job_name: Option<String>,
    pub response_content: Option<String>,
}

/// Page selector for log listings. Pages are 1-based.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    /// Clamp limit into [1, MAX_LIMIT] and page to at least 1.
    pub fn clamped(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

/// One page of logs plus the unpaginated total.
#[derive(Debug, Clone)]
pub struct LogPage {
    pub logs: Vec<chimer_core::types::ExecutionLog>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

/// Best-effort runtime field update applied by the engine's finalizer.
/// Absent fields are left untouched; last writer wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeUpdate {
    pub current_running: Option<u32>,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub execution_count: Option<u64>,
}

/// Aggregate counters over a set of logs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatLine {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    /// Percentage with two decimals; 0 when there are no logs.
    pub success_rate: f64,
    pub min_execution_time: Option<u64>,
    pub avg_execution_time: Option<f64>,
    pub max_execution_time: Option<u64>,
}

impl StatLine {
    pub fn success_rate_of(success: u64, total: u64) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let pct = success as f64 / total as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }
}

/// Per-job stats row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub job_id: Uuid,
    pub job_name: String,
    #[serde(flatten)]
    pub line: StatLine,
}

/// Overall + per-job execution statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    pub overall: StatLine,
    pub per_job: Vec<JobStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps() {
        let p = Pagination::clamped(0, 500);
        assert_eq!(p.page, 1);
        assert_eq!(p.limit, Pagination::MAX_LIMIT);
        assert_eq!(p.offset(), 0);

        let p = Pagination::clamped(3, 20);
        assert_eq!(p.offset(), 40);
    }

    #[test]
    fn success_rate_two_decimals() {
        assert_eq!(StatLine::success_rate_of(1, 3), 33.33);
        assert_eq!(StatLine::success_rate_of(0, 0), 0.0);
        assert_eq!(StatLine::success_rate_of(2, 2), 100.0);
    }
}
