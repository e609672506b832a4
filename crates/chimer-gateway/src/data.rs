//! Data export/import. The payload round-trips every job's identity set
//! (including tag names); execution logs are deliberately not exported.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use chimer_core::error::Error;
use chimer_core::types::{ExecutionMode, HttpMethod, Job, ScheduleType};
use chimer_scheduler::schedule;

use crate::routes::ApiError;
use crate::server::AppState;

const EXPORT_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    pub metadata: ExportMetadata,
    pub data: ExportData,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub exported_at: DateTime<Utc>,
    pub version: String,
    pub counts: ExportCounts,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportCounts {
    pub cron_jobs: u64,
    pub tags: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    pub cron_jobs: Vec<ExportedJob>,
    #[serde(default)]
    pub tags: Vec<ExportedTag>,
}

/// A job's portable identity set. Runtime counters and timestamps stay home.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedJob {
    pub name: String,
    pub url: String,
    pub method: HttpMethod,
    pub headers: Option<String>,
    pub body: Option<String>,
    pub schedule: String,
    pub schedule_type: ScheduleType,
    pub is_active: bool,
    pub request_timeout: Option<u64>,
    pub execution_mode: ExecutionMode,
    pub max_concurrent: u32,
    #[serde(default)]
    pub tag_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedTag {
    pub name: String,
}

impl ExportedJob {
    fn from_job(job: &Job, tag_names: Vec<String>) -> Self {
        Self {
            name: job.name.clone(),
            url: job.url.clone(),
            method: job.method,
            headers: job.headers.clone(),
            body: job.body.clone(),
            schedule: job.schedule.clone(),
            schedule_type: job.schedule_type,
            is_active: job.is_active,
            request_timeout: job.request_timeout,
            execution_mode: job.execution_mode,
            max_concurrent: job.max_concurrent,
            tag_names,
        }
    }

    fn into_job(self) -> Job {
        let mut job = Job::new(
            self.name,
            self.url,
            self.method,
            self.schedule,
            self.schedule_type,
        );
        job.headers = self.headers;
        job.body = self.body;
        job.is_active = self.is_active;
        job.request_timeout = self.request_timeout;
        job.execution_mode = self.execution_mode;
        job.max_concurrent = self.max_concurrent;
        job
    }
}

/// Structural + semantic checks on one imported job.
fn validate_exported_job(index: usize, job: &ExportedJob) -> Result<(), String> {
    let label = if job.name.trim().is_empty() {
        format!("cronJobs[{index}]")
    } else {
        format!("cronJobs[{index}] ({})", job.name)
    };
    if job.name.trim().is_empty() {
        return Err(format!("{label}: name must not be empty"));
    }
    if !job.url.starts_with("http://") && !job.url.starts_with("https://") {
        return Err(format!("{label}: url must start with http:// or https://"));
    }
    if let Err(e) = schedule::validate(&job.schedule, job.schedule_type) {
        return Err(format!("{label}: {e}"));
    }
    if let Some(ms) = job.request_timeout {
        if !(1_000..=300_000).contains(&ms) {
            return Err(format!("{label}: requestTimeout out of range"));
        }
    }
    if !(1..=100).contains(&job.max_concurrent) {
        return Err(format!("{label}: maxConcurrent out of range"));
    }
    Ok(())
}

fn validate_payload(payload: &ExportPayload) -> Vec<String> {
    payload
        .data
        .cron_jobs
        .iter()
        .enumerate()
        .filter_map(|(i, job)| validate_exported_job(i, job).err())
        .collect()
}

async fn apply_import(
    state: &AppState,
    payload: ExportPayload,
) -> Result<(usize, usize), ApiError> {
    let errors = validate_payload(&payload);
    if !errors.is_empty() {
        return Err(Error::Validation(errors.join("; ")).into());
    }
    let tag_count = payload.data.tags.len();
    let mut imported = 0usize;
    for exported in payload.data.cron_jobs {
        let tag_names = exported.tag_names.clone();
        let job = exported.into_job();
        let created = state.store.create_job(&job)?;
        if !tag_names.is_empty() {
            state.store.set_job_tags(created.id, &tag_names)?;
        }
        if created.is_active {
            state.engine.lock().await.register(created)?;
        }
        imported += 1;
    }
    info!(imported, "data import complete");
    Ok((imported, tag_count))
}

// ── Handlers ──────────────────────────────

pub async fn export_data(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ExportPayload>, ApiError> {
    let jobs = state.store.list_jobs()?;
    let mut cron_jobs = Vec::with_capacity(jobs.len());
    for job in &jobs {
        let tag_names = state.store.tag_names_for_job(job.id)?;
        cron_jobs.push(ExportedJob::from_job(job, tag_names));
    }
    let tags: Vec<ExportedTag> = state
        .store
        .list_tag_names()?
        .into_iter()
        .map(|name| ExportedTag { name })
        .collect();
    let payload = ExportPayload {
        metadata: ExportMetadata {
            exported_at: Utc::now(),
            version: EXPORT_VERSION.to_string(),
            counts: ExportCounts {
                cron_jobs: cron_jobs.len() as u64,
                tags: tags.len() as u64,
            },
        },
        data: ExportData { cron_jobs, tags },
    };
    Ok(Json(payload))
}

pub async fn import_data(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExportPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (jobs, tags) = apply_import(&state, payload).await?;
    Ok(Json(json!({ "imported": { "cronJobs": jobs, "tags": tags } })))
}

/// Same as `import_data`, but the document arrives as an uploaded file body.
pub async fn import_file(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let payload: ExportPayload = serde_json::from_slice(&body)
        .map_err(|e| Error::Validation(format!("invalid import document: {e}")))?;
    let (jobs, tags) = apply_import(&state, payload).await?;
    Ok(Json(json!({ "imported": { "cronJobs": jobs, "tags": tags } })))
}

pub async fn validate_data(
    Json(document): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let payload: ExportPayload = match serde_json::from_value(document) {
        Ok(payload) => payload,
        Err(e) => {
            return Ok(Json(json!({
                "valid": false,
                "errors": [format!("invalid document structure: {e}")],
            })))
        }
    };
    let errors = validate_payload(&payload);
    Ok(Json(json!({
        "valid": errors.is_empty(),
        "errors": errors,
        "counts": {
            "cronJobs": payload.data.cron_jobs.len(),
            "tags": payload.data.tags.len(),
        },
    })))
}
