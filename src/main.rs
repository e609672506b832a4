//! chimer — persistent HTTP job scheduler.
//!
//! Boot order: config → store → engine (register active jobs) →
//! retention sweeper → REST gateway. Ctrl-C flips the shutdown flag,
//! the gateway and timers stop, and in-flight executions drain.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use chimer_core::{Config, DbConfig};
use chimer_gateway::{serve, AppState};
use chimer_scheduler::{
    bootstrap, spawn_engine, spawn_sweeper, HttpInvoker, RetentionSweeper, SchedulerEngine,
};
use chimer_store::JobStore;

fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .try_init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;

    let store = match &config.db {
        DbConfig::Sqlite { path } => {
            info!(path = %path.display(), "opening sqlite store");
            Arc::new(JobStore::open(path).context("opening store")?)
        }
        DbConfig::Mysql { .. } => {
            anyhow::bail!("DB_TYPE=mysql is not compiled into this build; use sqlite");
        }
    };

    let invoker = Arc::new(HttpInvoker::new().context("building HTTP client")?);
    let engine = Arc::new(Mutex::new(SchedulerEngine::new(
        store.clone(),
        invoker,
        config.timezone,
    )));

    let registered = bootstrap(&engine).await.context("registering jobs")?;
    info!(registered, timezone = %config.timezone, "engine ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_task = spawn_engine(engine.clone(), shutdown_rx.clone());

    let sweeper = Arc::new(
        RetentionSweeper::new(store.clone(), config.log_retention_days, config.timezone)
            .context("building retention sweeper")?,
    );
    let sweeper_task = if config.log_cleanup_enabled {
        if let Err(e) = sweeper.sweep_now(None) {
            warn!(error = %e, "startup retention sweep failed");
        }
        Some(spawn_sweeper(sweeper.clone(), shutdown_rx.clone()))
    } else {
        info!("log cleanup disabled");
        None
    };

    let state = Arc::new(AppState::new(engine, store, sweeper));

    let server = tokio::spawn(serve(state, config.port, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    if let Err(e) = server.await.context("joining gateway task")? {
        warn!(error = %e, "gateway exited with error");
    }
    let _ = engine_task.await;
    if let Some(task) = sweeper_task {
        let _ = task.await;
    }
    info!("goodbye");
    Ok(())
}
