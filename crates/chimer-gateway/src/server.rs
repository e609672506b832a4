//! HTTP server assembly: shared state, router, and graceful serve loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use tokio::sync::{watch, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use chimer_core::error::{Error, Result};
use chimer_scheduler::{RetentionSweeper, SchedulerEngine};
use chimer_store::JobStore;

use crate::data;
use crate::ratelimit::TriggerLimiter;
use crate::routes;

/// Import documents can carry a lot of jobs; cap the body well above the
/// per-log payload sizes.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Shared state for every handler.
pub struct AppState {
    pub engine: Arc<Mutex<SchedulerEngine>>,
    pub store: Arc<JobStore>,
    pub sweeper: Arc<RetentionSweeper>,
    pub limiter: TriggerLimiter,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        engine: Arc<Mutex<SchedulerEngine>>,
        store: Arc<JobStore>,
        sweeper: Arc<RetentionSweeper>,
    ) -> Self {
        Self {
            engine,
            store,
            sweeper,
            limiter: TriggerLimiter::new(),
            start_time: Instant::now(),
        }
    }
}

/// Assemble the REST surface.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/jobs", get(routes::list_jobs).post(routes::create_job))
        .route(
            "/api/jobs/:id",
            get(routes::get_job)
                .put(routes::update_job)
                .delete(routes::delete_job),
        )
        .route("/api/jobs/:id/toggle", put(routes::toggle_job))
        .route("/api/jobs/:id/trigger", post(routes::trigger_job))
        .route("/api/jobs/:id/logs", get(routes::job_logs))
        .route("/api/logs/search", get(routes::search_logs))
        .route("/api/logs/stats", get(routes::log_stats))
        .route("/api/data/export", get(data::export_data))
        .route("/api/data/import", post(data::import_data))
        .route("/api/data/import/file", post(data::import_file))
        .route("/api/data/validate", post(data::validate_data))
        .route("/api/maintenance/cleanup", post(routes::cleanup_logs))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Bind and serve until the shutdown flag flips.
pub async fn serve(
    state: Arc<AppState>,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind port {port}: {e}")))?;
    info!(%addr, "gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| Error::Config(format!("gateway server error: {e}")))
}
