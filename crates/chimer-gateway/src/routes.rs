//! API route handlers. These are also the reconciler: every CRUD
//! lifecycle event is translated into the matching engine call.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use chimer_core::error::Error;
use chimer_core::types::{
    ExecutionLog, ExecutionMode, ExecutionStatus, HttpMethod, Job, ScheduleType,
    MAX_CONCURRENT_LIMIT, MAX_REQUEST_TIMEOUT_MS, MIN_REQUEST_TIMEOUT_MS,
};
use chimer_scheduler::{execute_now, schedule};
use chimer_store::{LogFilter, Pagination};

use crate::server::AppState;

/// Collapsed `responseBody` length when `expand=false`.
const COLLAPSED_BODY_CHARS: usize = 500;

// ── Error mapping ──────────────────────────────

/// Wrapper turning the core taxonomy into HTTP responses.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidSchedule(_)
            | Error::InvalidHeaders(_)
            | Error::Validation(_)
            | Error::Inactive(_)
            | Error::AlreadyRunning(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Transport(_)
            | Error::Http { .. }
            | Error::Store(_)
            | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut body = json!({ "error": self.0.to_string() });
        if let Error::RateLimited { retry_after } = &self.0 {
            body["retryAfter"] = json!(retry_after);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Request DTOs ──────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub method: Option<HttpMethod>,
    pub headers: Option<String>,
    pub body: Option<String>,
    pub schedule: String,
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub is_active: Option<bool>,
    pub request_timeout: Option<u64>,
    #[serde(default)]
    pub execution_mode: Option<ExecutionMode>,
    pub max_concurrent: Option<u32>,
    #[serde(default)]
    pub tag_names: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<HttpMethod>,
    /// `Some(None)` clears the stored headers.
    #[serde(default, with = "double_option")]
    pub headers: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub body: Option<Option<String>>,
    pub schedule: Option<String>,
    pub schedule_type: Option<ScheduleType>,
    pub is_active: Option<bool>,
    #[serde(default, with = "double_option")]
    pub request_timeout: Option<Option<u64>>,
    pub execution_mode: Option<ExecutionMode>,
    pub max_concurrent: Option<u32>,
    pub tag_names: Option<Vec<String>>,
}

/// Distinguishes "field absent" from "field set to null".
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQuery {
    pub status: Option<String>,
    pub triggered_manually: Option<bool>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub expand: Option<bool>,
    // Search-only filters.
    pub job_name: Option<String>,
    pub response_content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupQuery {
    pub retention_days: Option<u32>,
}

// ── Validation helpers ──────────────────────────────

fn validate_name(name: &str) -> Result<(), Error> {
    if name.trim().is_empty() {
        return Err(Error::Validation("name must not be empty".into()));
    }
    Ok(())
}

/// Accepts DNS names, IPv4/IPv6 literals, and container service names.
fn validate_url(url: &str) -> Result<(), Error> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| Error::Validation("url must start with http:// or https://".into()))?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if authority.is_empty() {
        return Err(Error::Validation("url is missing a host".into()));
    }
    let host_ok = authority
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '[' | ']' | '@'));
    if !host_ok {
        return Err(Error::Validation(format!("invalid host in url: {authority}")));
    }
    Ok(())
}

fn validate_timeout(timeout: Option<u64>) -> Result<(), Error> {
    if let Some(ms) = timeout {
        if !(MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS).contains(&ms) {
            return Err(Error::Validation(format!(
                "requestTimeout must be between {MIN_REQUEST_TIMEOUT_MS} and {MAX_REQUEST_TIMEOUT_MS} ms"
            )));
        }
    }
    Ok(())
}

fn validate_max_concurrent(value: u32) -> Result<(), Error> {
    if !(1..=MAX_CONCURRENT_LIMIT).contains(&value) {
        return Err(Error::Validation(format!(
            "maxConcurrent must be between 1 and {MAX_CONCURRENT_LIMIT}"
        )));
    }
    Ok(())
}

fn validate_job(job: &Job) -> Result<(), Error> {
    validate_name(&job.name)?;
    validate_url(&job.url)?;
    validate_timeout(job.request_timeout)?;
    validate_max_concurrent(job.max_concurrent)?;
    schedule::validate(&job.schedule, job.schedule_type)?;
    Ok(())
}

/// Accepts RFC 3339 timestamps or bare dates (taken as UTC midnight).
fn parse_date(raw: &str, field: &str) -> Result<DateTime<Utc>, Error> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(date) = raw.parse::<NaiveDate>() {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(DateTime::from_naive_utc_and_offset(midnight, Utc));
        }
    }
    Err(Error::Validation(format!("invalid {field}: {raw}")))
}

fn parse_opt_date(raw: &Option<String>, field: &str) -> Result<Option<DateTime<Utc>>, Error> {
    raw.as_deref().map(|s| parse_date(s, field)).transpose()
}

fn log_filter_from_query(query: &LogQuery) -> Result<LogFilter, Error> {
    let status = query
        .status
        .as_deref()
        .map(|raw| raw.parse::<ExecutionStatus>().map_err(Error::Validation))
        .transpose()?;
    Ok(LogFilter {
        status,
        triggered_manually: query.triggered_manually,
        start: parse_opt_date(&query.start_date, "startDate")?,
        end: parse_opt_date(&query.end_date, "endDate")?,
        job_name: query.job_name.clone(),
        response_content: query.response_content.clone(),
        ..LogFilter::default()
    })
}

/// Collapse `responseBody` unless the caller asked for the full payload.
fn collapse_log(mut log: ExecutionLog, expand: bool) -> ExecutionLog {
    if !expand {
        if let Some(body) = &log.response_body {
            if body.chars().count() > COLLAPSED_BODY_CHARS {
                let cut: String = body.chars().take(COLLAPSED_BODY_CHARS).collect();
                log.response_body = Some(format!("{cut}..."));
            }
        }
    }
    log
}

fn log_page_response(
    page: chimer_store::LogPage,
    expand: bool,
) -> Json<serde_json::Value> {
    let total_pages = if page.total == 0 {
        0
    } else {
        (page.total + u64::from(page.limit) - 1) / u64::from(page.limit)
    };
    let logs: Vec<ExecutionLog> = page
        .logs
        .into_iter()
        .map(|l| collapse_log(l, expand))
        .collect();
    Json(json!({
        "logs": logs,
        "total": page.total,
        "page": page.page,
        "limit": page.limit,
        "totalPages": total_pages,
    }))
}

async fn job_response(state: &AppState, job: Job) -> serde_json::Value {
    let engine_view = state.engine.lock().await.job_status(job.id);
    let tag_names = state.store.tag_names_for_job(job.id).unwrap_or_default();
    let mut value = serde_json::to_value(&job).unwrap_or_else(|_| json!({}));
    value["tagNames"] = json!(tag_names);
    match engine_view {
        Some(view) => {
            value["engineStatus"] = json!(view.status);
            value["nextRun"] = json!(view.next_run);
            value["scheduleDescription"] = json!(view.schedule_description);
        }
        None => {
            value["engineStatus"] = serde_json::Value::Null;
            value["nextRun"] = serde_json::Value::Null;
        }
    }
    value
}

// ── Job CRUD + reconciliation ──────────────────────────────

pub async fn list_jobs(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let jobs = state.store.list_jobs()?;
    let mut out = Vec::with_capacity(jobs.len());
    for job in jobs {
        out.push(job_response(&state, job).await);
    }
    Ok(Json(json!(out)))
}

pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateJobRequest>,
) -> ApiResult<Response> {
    let mut job = Job::new(
        req.name,
        req.url,
        req.method.unwrap_or(HttpMethod::Get),
        req.schedule,
        req.schedule_type,
    );
    job.headers = req.headers;
    job.body = req.body;
    job.is_active = req.is_active.unwrap_or(true);
    job.request_timeout = req.request_timeout;
    job.execution_mode = req.execution_mode.unwrap_or(ExecutionMode::Sequential);
    job.max_concurrent = req.max_concurrent.unwrap_or(1);
    validate_job(&job)?;

    let created = state.store.create_job(&job)?;
    if let Some(tags) = &req.tag_names {
        state.store.set_job_tags(created.id, tags)?;
    }
    if created.is_active {
        state.engine.lock().await.register(created.clone())?;
    }
    let body = job_response(&state, created).await;
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let job = state.store.get_job(id)?;
    Ok(Json(job_response(&state, job).await))
}

pub async fn update_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateJobRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut job = state.store.get_job(id)?;
    if let Some(name) = req.name {
        job.name = name;
    }
    if let Some(url) = req.url {
        job.url = url;
    }
    if let Some(method) = req.method {
        job.method = method;
    }
    if let Some(headers) = req.headers {
        job.headers = headers;
    }
    if let Some(body) = req.body {
        job.body = body;
    }
    if let Some(schedule) = req.schedule {
        job.schedule = schedule;
    }
    if let Some(schedule_type) = req.schedule_type {
        job.schedule_type = schedule_type;
    }
    if let Some(is_active) = req.is_active {
        job.is_active = is_active;
    }
    if let Some(timeout) = req.request_timeout {
        job.request_timeout = timeout;
    }
    if let Some(mode) = req.execution_mode {
        job.execution_mode = mode;
    }
    if let Some(max_concurrent) = req.max_concurrent {
        job.max_concurrent = max_concurrent;
    }
    validate_job(&job)?;

    let updated = state.store.update_job(&job)?;
    if let Some(tags) = &req.tag_names {
        state.store.set_job_tags(id, tags)?;
    }
    state.engine.lock().await.update(id)?;
    Ok(Json(job_response(&state, updated).await))
}

pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.lock().await.remove(id);
    state.store.delete_job(id)?;
    Ok(Json(json!({ "deleted": id })))
}

pub async fn toggle_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let job = state.store.get_job(id)?;
    let updated = state.store.set_active(id, !job.is_active)?;
    {
        let mut engine = state.engine.lock().await;
        if updated.is_active {
            engine.enable(id)?;
        } else {
            engine.disable(id);
        }
    }
    Ok(Json(job_response(&state, updated).await))
}

// ── Manual trigger ──────────────────────────────

pub async fn trigger_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    if let Err(retry_after) = state.limiter.check(id) {
        return Err(Error::RateLimited { retry_after }.into());
    }
    let log = execute_now(&state.engine, id).await?;
    let succeeded = log.status == ExecutionStatus::Success;
    let status = if succeeded {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(json!({ "success": succeeded, "log": log }))).into_response())
}

// ── Logs ──────────────────────────────

pub async fn job_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.get_job(id)?;
    let mut filter = log_filter_from_query(&query)?;
    filter.job_id = Some(id);
    // Per-job listing ignores the search-only filters.
    filter.job_name = None;
    filter.response_content = None;
    let page = Pagination::clamped(
        query.page.unwrap_or(1),
        query.limit.unwrap_or(Pagination::DEFAULT_LIMIT),
    );
    let result = state.store.list_logs(&filter, page)?;
    Ok(log_page_response(result, query.expand.unwrap_or(false)))
}

pub async fn search_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let filter = log_filter_from_query(&query)?;
    let page = Pagination::clamped(
        query.page.unwrap_or(1),
        query.limit.unwrap_or(Pagination::DEFAULT_LIMIT),
    );
    let result = state.store.list_logs(&filter, page)?;
    Ok(log_page_response(result, query.expand.unwrap_or(false)))
}

pub async fn log_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<chimer_store::LogStats>> {
    let start = parse_opt_date(&query.start_date, "startDate")?;
    let end = parse_opt_date(&query.end_date, "endDate")?;
    Ok(Json(state.store.log_stats(start, end)?))
}

// ── Maintenance & health ──────────────────────────────

pub async fn cleanup_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CleanupQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    if let Some(days) = query.retention_days {
        if days == 0 {
            return Err(Error::Validation("retentionDays must be greater than zero".into()).into());
        }
    }
    let deleted = state.sweeper.sweep_now(query.retention_days)?;
    Ok(Json(json!({ "deleted": deleted })))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let registered = state.engine.lock().await.registered_count();
    let jobs = state.store.count_jobs().unwrap_or_else(|e| {
        warn!(error = %e, "health check could not count jobs");
        0
    });
    Json(json!({
        "status": "ok",
        "service": "chimer",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.start_time.elapsed().as_secs(),
        "registeredJobs": registered,
        "storedJobs": jobs,
    }))
}
