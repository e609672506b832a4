//! Scheduler core — the in-memory registry and the dispatch pipeline.
//!
//! A 500 ms tick loop walks the registry for due entries. The gating
//! decision and the running-counter increment happen under the engine
//! lock; the execution itself (HTTP + log write + finalizer) runs on a
//! spawned task so ticks never block on I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use chimer_core::error::{Error, Result};
use chimer_core::types::{ExecutionLog, ExecutionStatus, Job};
use chimer_store::{JobStore, RuntimeUpdate};

use crate::invoker::Invoke;
use crate::schedule::Schedule;

/// Registry scan cadence.
pub const TICK_INTERVAL_MS: u64 = 500;

/// Observable state of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Idle,
    Running,
    Error,
}

/// Snapshot of one registered job for observability endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub name: String,
    pub status: EntryStatus,
    pub running: u32,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub schedule_description: String,
}

struct JobEntry {
    job: Job,
    schedule: Schedule,
    next_run: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
    status: EntryStatus,
    /// Shared with in-flight executions so the finalizer can decrement
    /// after the entry is gone.
    running: Arc<AtomicU32>,
}

/// A dispatch decision: this job snapshot gets one execution.
pub struct Fire {
    job: Job,
    manual: bool,
    running: Arc<AtomicU32>,
}

/// The engine owns the registry; everything else reaches it through
/// `Arc<Mutex<SchedulerEngine>>`.
pub struct SchedulerEngine {
    registry: HashMap<Uuid, JobEntry>,
    store: Arc<JobStore>,
    invoker: Arc<dyn Invoke>,
    tz: Tz,
}

impl SchedulerEngine {
    pub fn new(store: Arc<JobStore>, invoker: Arc<dyn Invoke>, tz: Tz) -> Self {
        Self {
            registry: HashMap::new(),
            store,
            invoker,
            tz,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Install (or reinstall) a job's timer. Idempotent: an existing entry
    /// is replaced, keeping its running counter so in-flight executions
    /// stay accounted for. Registering an inactive job only clears state.
    pub fn register(&mut self, job: Job) -> Result<()> {
        if !job.is_active {
            if self.registry.remove(&job.id).is_some() {
                info!(job_id = %job.id, "cleared timer for inactive job");
            }
            return Ok(());
        }
        let schedule = Schedule::parse(&job.schedule, job.schedule_type)?;
        let next_run = schedule.next_after(Utc::now(), self.tz);
        let running = self
            .registry
            .remove(&job.id)
            .map(|e| e.running)
            .unwrap_or_default();
        let status = if running.load(Ordering::SeqCst) > 0 {
            EntryStatus::Running
        } else {
            EntryStatus::Idle
        };
        info!(
            job_id = %job.id,
            name = %job.name,
            schedule = %job.schedule,
            next_run = ?next_run,
            "job registered"
        );
        self.registry.insert(
            job.id,
            JobEntry {
                job,
                schedule,
                next_run,
                last_run: None,
                status,
                running,
            },
        );
        Ok(())
    }

    /// Reload a job from the store and reinstall its timer; removes the
    /// entry when the job went inactive or disappeared.
    pub fn update(&mut self, id: Uuid) -> Result<()> {
        match self.store.get_job(id) {
            Ok(job) => self.register(job),
            Err(Error::NotFound(_)) => {
                self.registry.remove(&id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn enable(&mut self, id: Uuid) -> Result<()> {
        let job = self.store.get_job(id)?;
        self.register(job)
    }

    /// Stop firing; in-flight executions are left to drain.
    pub fn disable(&mut self, id: Uuid) {
        if self.registry.remove(&id).is_some() {
            info!(job_id = %id, "job disabled");
        }
    }

    /// Drop the registry entry. Executions already in flight complete and
    /// log normally; the finalizer tolerates the missing entry.
    pub fn remove(&mut self, id: Uuid) {
        if self.registry.remove(&id).is_some() {
            info!(job_id = %id, "job removed from scheduler");
        }
    }

    pub fn is_registered(&self, id: Uuid) -> bool {
        self.registry.contains_key(&id)
    }

    pub fn is_job_running(&self, id: Uuid) -> bool {
        self.registry
            .get(&id)
            .is_some_and(|e| e.running.load(Ordering::SeqCst) > 0)
    }

    pub fn job_status(&self, id: Uuid) -> Option<JobStatusView> {
        self.registry.get(&id).map(|e| JobStatusView {
            job_id: id,
            name: e.job.name.clone(),
            status: e.status,
            running: e.running.load(Ordering::SeqCst),
            last_run: e.last_run,
            next_run: e.next_run,
            schedule_description: e.schedule.describe(),
        })
    }

    pub fn registered_count(&self) -> usize {
        self.registry.len()
    }

    /// Walk the registry for due entries and produce dispatch decisions.
    /// Called from the tick loop with the lock held; each consumed fire
    /// advances `next_run` whether it dispatched or was gated away.
    pub fn collect_fires(&mut self, now: DateTime<Utc>) -> Vec<Fire> {
        let due: Vec<Uuid> = self
            .registry
            .iter()
            .filter(|(_, e)| e.next_run.is_some_and(|t| t <= now))
            .map(|(id, _)| *id)
            .collect();

        let mut fires = Vec::new();
        for id in due {
            // Reload so gating sees current fields and deleted/disabled
            // jobs fall out of the registry.
            let job = match self.store.get_job(id) {
                Ok(job) => job,
                Err(Error::NotFound(_)) => {
                    info!(job_id = %id, "job vanished from store, unregistering");
                    self.registry.remove(&id);
                    continue;
                }
                Err(e) => {
                    warn!(job_id = %id, error = %e, "store reload failed, skipping fire");
                    if let Some(entry) = self.registry.get_mut(&id) {
                        entry.next_run = entry.schedule.next_after(now, self.tz);
                    }
                    continue;
                }
            };
            if !job.is_active {
                info!(job_id = %id, "job no longer active, unregistering");
                self.registry.remove(&id);
                continue;
            }

            let Some(entry) = self.registry.get_mut(&id) else {
                continue;
            };
            entry.next_run = entry.schedule.next_after(now, self.tz);

            let cap = job.effective_max_concurrent();
            let in_flight = entry.running.load(Ordering::SeqCst);
            if in_flight >= cap {
                warn!(
                    job_id = %id,
                    name = %job.name,
                    in_flight,
                    cap,
                    mode = %job.execution_mode,
                    "skipping fire, job saturated"
                );
                continue;
            }

            entry.running.fetch_add(1, Ordering::SeqCst);
            entry.status = EntryStatus::Running;
            entry.last_run = Some(now);
            entry.job = job.clone();
            if let Err(e) = self.store.update_job_runtime(
                id,
                RuntimeUpdate {
                    current_running: Some(in_flight + 1),
                    ..RuntimeUpdate::default()
                },
            ) {
                warn!(job_id = %id, error = %e, "failed to persist running counter");
            }
            fires.push(Fire {
                job,
                manual: false,
                running: entry.running.clone(),
            });
        }
        fires
    }
}

/// Load every active job from the store and register it.
/// Invalid schedules are logged and skipped, not fatal.
pub async fn bootstrap(engine: &Arc<Mutex<SchedulerEngine>>) -> Result<usize> {
    let mut eng = engine.lock().await;
    let jobs = eng.store.list_active_jobs()?;
    let mut registered = 0usize;
    for job in jobs {
        let id = job.id;
        match eng.register(job) {
            Ok(()) => registered += 1,
            Err(e) => warn!(job_id = %id, error = %e, "skipping job with invalid schedule"),
        }
    }
    info!(registered, "scheduler bootstrap complete");
    Ok(registered)
}

/// Run the tick loop until shutdown flips. Fires are handed to spawned
/// tasks; a panic inside an execution never reaches this loop.
pub fn spawn_engine(
    engine: Arc<Mutex<SchedulerEngine>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(tick_ms = TICK_INTERVAL_MS, "scheduler engine started");
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let fires = { engine.lock().await.collect_fires(Utc::now()) };
                    for fire in fires {
                        let engine = engine.clone();
                        tokio::spawn(async move {
                            run_fire(engine, fire).await;
                        });
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine stopping");
                        break;
                    }
                }
            }
        }
    })
}

/// Out-of-band execution of one job, same pipeline as a scheduled fire.
/// The rate limiter lives in the API layer; this function does not
/// consult it.
pub async fn execute_now(
    engine: &Arc<Mutex<SchedulerEngine>>,
    id: Uuid,
) -> Result<ExecutionLog> {
    let fire = {
        let mut eng = engine.lock().await;
        let job = eng.store.get_job(id)?;
        if !job.is_active {
            return Err(Error::Inactive(id));
        }
        let running = eng
            .registry
            .get(&id)
            .map(|e| e.running.clone())
            .unwrap_or_default();
        let in_flight = running.load(Ordering::SeqCst);
        if in_flight >= job.effective_max_concurrent() {
            return Err(Error::AlreadyRunning(id));
        }
        running.fetch_add(1, Ordering::SeqCst);
        if let Some(entry) = eng.registry.get_mut(&id) {
            entry.status = EntryStatus::Running;
            entry.last_run = Some(Utc::now());
        }
        if let Err(e) = eng.store.update_job_runtime(
            id,
            RuntimeUpdate {
                current_running: Some(in_flight + 1),
                ..RuntimeUpdate::default()
            },
        ) {
            warn!(job_id = %id, error = %e, "failed to persist running counter");
        }
        info!(job_id = %id, "manual trigger dispatched");
        Fire {
            job,
            manual: true,
            running,
        }
    };
    Ok(run_fire(engine.clone(), fire).await)
}

/// Execute one fire: invoke, write exactly one log, update runtime
/// fields, then decrement the running counter. Store failures are logged
/// and swallowed; the engine stays live.
async fn run_fire(engine: Arc<Mutex<SchedulerEngine>>, fire: Fire) -> ExecutionLog {
    let (store, invoker) = {
        let eng = engine.lock().await;
        (eng.store.clone(), eng.invoker.clone())
    };
    let job_id = fire.job.id;
    let started = Utc::now();

    let outcome = invoker.invoke(&fire.job).await;
    debug!(
        job_id = %job_id,
        status = %outcome.status,
        code = ?outcome.response_code,
        elapsed_ms = outcome.execution_time,
        "execution finished"
    );

    let log = ExecutionLog {
        id: Uuid::new_v4(),
        job_id,
        executed_at: started,
        status: outcome.status,
        response_code: outcome.response_code,
        execution_time: outcome.execution_time,
        response_body: outcome.response_body,
        error_message: outcome.error_message,
        triggered_manually: fire.manual,
    };
    if let Err(e) = store.insert_log(&log) {
        warn!(job_id = %job_id, error = %e, "failed to persist execution log");
    }
    if let Err(e) = store.update_job_runtime(
        job_id,
        RuntimeUpdate {
            last_executed_at: Some(started),
            execution_count: Some(fire.job.execution_count + 1),
            ..RuntimeUpdate::default()
        },
    ) {
        warn!(job_id = %job_id, error = %e, "failed to update execution counters");
    }

    // Finalizer: release the slot even when the entry is gone.
    let remaining = fire
        .running
        .fetch_sub(1, Ordering::SeqCst)
        .saturating_sub(1);
    {
        let mut eng = engine.lock().await;
        if let Some(entry) = eng.registry.get_mut(&job_id) {
            if remaining == 0 {
                entry.status = if log.status == ExecutionStatus::Failed {
                    EntryStatus::Error
                } else {
                    EntryStatus::Idle
                };
            }
        }
        if let Err(e) = eng.store.update_job_runtime(
            job_id,
            RuntimeUpdate {
                current_running: Some(remaining),
                ..RuntimeUpdate::default()
            },
        ) {
            warn!(job_id = %job_id, error = %e, "failed to persist running counter");
        }
    }
    log
}
