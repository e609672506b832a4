//! Domain model — the persisted job recipe and its execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default per-request timeout when a job does not set one.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Smallest accepted per-request timeout.
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 1_000;
/// Largest accepted per-request timeout.
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 300_000;
/// Upper bound for `max_concurrent` on parallel jobs.
pub const MAX_CONCURRENT_LIMIT: u32 = 100;

/// HTTP method a job is allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            other => Err(format!("unsupported HTTP method: {other}")),
        }
    }
}

/// Which schedule dialect `Job::schedule` is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Cron,
    Repeat,
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleType::Cron => write!(f, "cron"),
            ScheduleType::Repeat => write!(f, "repeat"),
        }
    }
}

impl std::str::FromStr for ScheduleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cron" => Ok(ScheduleType::Cron),
            "repeat" => Ok(ScheduleType::Repeat),
            other => Err(format!("unknown schedule type: {other}")),
        }
    }
}

/// Gating policy applied when a fire arrives while the job is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Strictly one in-flight execution; overlapping fires are skipped.
    Sequential,
    /// Up to `max_concurrent` in-flight executions.
    Parallel,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(ExecutionMode::Sequential),
            "parallel" => Ok(ExecutionMode::Parallel),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// Terminal outcome of one attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// A persisted recipe for one HTTP request plus a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    /// Absolute HTTP/HTTPS URL. The hostname may be a DNS name, an IP
    /// literal, or a container service name.
    pub url: String,
    pub method: HttpMethod,
    /// Optional JSON object literal stored as text. Invalid JSON is
    /// treated as an empty header map at execution time.
    pub headers: Option<String>,
    /// Optional request body; sent as JSON when it parses, text otherwise.
    pub body: Option<String>,
    pub schedule: String,
    pub schedule_type: ScheduleType,
    pub is_active: bool,
    /// Per-request timeout in milliseconds; engine default applies when absent.
    pub request_timeout: Option<u64>,
    pub execution_mode: ExecutionMode,
    pub max_concurrent: u32,
    /// Maintained by the engine; never user-writable.
    pub current_running: u32,
    pub execution_count: u64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a job with fresh id and timestamps; runtime counters start at zero.
    pub fn new(
        name: String,
        url: String,
        method: HttpMethod,
        schedule: String,
        schedule_type: ScheduleType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            url,
            method,
            headers: None,
            body: None,
            schedule,
            schedule_type,
            is_active: true,
            request_timeout: None,
            execution_mode: ExecutionMode::Sequential,
            max_concurrent: 1,
            current_running: 0,
            execution_count: 0,
            last_executed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Effective per-request timeout in milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS)
    }

    /// Concurrency cap after applying the gating policy.
    /// Sequential jobs are capped at one regardless of `max_concurrent`.
    pub fn effective_max_concurrent(&self) -> u32 {
        match self.execution_mode {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Parallel => self.max_concurrent.max(1),
        }
    }
}

/// Record of a single attempt sequence (one invoker call).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLog {
    pub id: Uuid,
    pub job_id: Uuid,
    /// Start of the attempt sequence.
    pub executed_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub response_code: Option<u16>,
    /// Milliseconds from start to terminal outcome, backoffs included.
    pub execution_time: u64,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub triggered_manually: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_display_and_parse() {
        assert_eq!(HttpMethod::Get.to_string(), "GET");
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert!("PATCH".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn enums_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&ScheduleType::Repeat).unwrap(),
            "\"repeat\""
        );
        assert_eq!(
            serde_json::to_string(&ExecutionMode::Sequential).unwrap(),
            "\"sequential\""
        );
        let parsed: ExecutionStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(parsed, ExecutionStatus::Failed);
    }

    #[test]
    fn sequential_caps_concurrency_at_one() {
        let mut job = Job::new(
            "ping".into(),
            "https://example.com/ping".into(),
            HttpMethod::Get,
            "5s".into(),
            ScheduleType::Repeat,
        );
        job.max_concurrent = 10;
        assert_eq!(job.effective_max_concurrent(), 1);
        job.execution_mode = ExecutionMode::Parallel;
        assert_eq!(job.effective_max_concurrent(), 10);
    }

    #[test]
    fn timeout_defaults_to_30s() {
        let job = Job::new(
            "ping".into(),
            "https://example.com/ping".into(),
            HttpMethod::Get,
            "5s".into(),
            ScheduleType::Repeat,
        );
        assert_eq!(job.timeout_ms(), 30_000);
    }

    #[test]
    fn job_serde_roundtrip_camel_case() {
        let job = Job::new(
            "Morning ping".into(),
            "https://api.example.com/ping".into(),
            HttpMethod::Get,
            "0 9 * * *".into(),
            ScheduleType::Cron,
        );
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"scheduleType\":\"cron\""));
        assert!(json.contains("\"isActive\":true"));
        let parsed: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.schedule, job.schedule);
    }
}
