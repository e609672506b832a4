//! Retention sweeper — deletes execution logs past the retention horizon.
//! Runs every midnight in the configured zone, plus an optional sweep at
//! startup and an operator-triggered `sweep_now`.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use chimer_core::error::{Error, Result};
use chimer_store::JobStore;

use crate::cron::CronExpr;

const SWEEP_SCHEDULE: &str = "0 0 * * *";

pub struct RetentionSweeper {
    store: Arc<JobStore>,
    retention_days: u32,
    tz: Tz,
    schedule: CronExpr,
}

impl RetentionSweeper {
    pub fn new(store: Arc<JobStore>, retention_days: u32, tz: Tz) -> Result<Self> {
        if retention_days == 0 {
            return Err(Error::Config("retention must be at least one day".into()));
        }
        let schedule = CronExpr::parse(SWEEP_SCHEDULE).map_err(Error::InvalidSchedule)?;
        Ok(Self {
            store,
            retention_days,
            tz,
            schedule,
        })
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Delete logs older than the horizon and return how many went.
    /// The operator may override the horizon for a single sweep.
    pub fn sweep_now(&self, retention_override: Option<u32>) -> Result<u64> {
        let days = retention_override.unwrap_or(self.retention_days).max(1);
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
        let started = Instant::now();
        info!(retention_days = days, %cutoff, "retention sweep started");
        let deleted = self.store.delete_logs_before(cutoff)?;
        info!(
            deleted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retention sweep finished"
        );
        Ok(deleted)
    }
}

/// Sleep until each midnight in the sweeper's zone and sweep.
pub fn spawn_sweeper(
    sweeper: Arc<RetentionSweeper>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            retention_days = sweeper.retention_days,
            "retention sweeper started"
        );
        loop {
            let Some(next) = sweeper.schedule.next_after(Utc::now(), sweeper.tz) else {
                warn!("could not compute next sweep time, sweeper stopping");
                break;
            };
            let wait = (next - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = sweeper.sweep_now(None) {
                        warn!(error = %e, "retention sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("retention sweeper stopping");
                        break;
                    }
                }
            }
        }
    })
}
