//! Per-job rate limiter for manual triggers. One trigger per job per
//! 10-second window; advisory to the API layer only. Scheduled fires
//! never consult it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Default window between manual triggers of the same job.
pub const WINDOW: Duration = Duration::from_secs(10);
/// Table size past which stale entries are garbage-collected.
const GC_THRESHOLD: usize = 100;

pub struct TriggerLimiter {
    window: Duration,
    entries: Mutex<HashMap<Uuid, Instant>>,
}

impl Default for TriggerLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerLimiter {
    pub fn new() -> Self {
        Self::with_window(WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Take the job's token for this window. On violation returns the
    /// remaining wait in seconds, rounded up to one decimal.
    pub fn check(&self, id: Uuid) -> Result<(), f64> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        if let Some(last) = entries.get(&id) {
            let elapsed = now.duration_since(*last);
            if elapsed < self.window {
                let remaining = (self.window - elapsed).as_secs_f64();
                return Err((remaining * 10.0).ceil() / 10.0);
            }
        }
        entries.insert(id, now);
        if entries.len() > GC_THRESHOLD {
            let horizon = self.window * 2;
            entries.retain(|_, last| now.duration_since(*last) <= horizon);
        }
        Ok(())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_trigger_in_window_is_limited() {
        let limiter = TriggerLimiter::new();
        let id = Uuid::new_v4();
        assert!(limiter.check(id).is_ok());
        let wait = limiter.check(id).unwrap_err();
        assert!(wait > 0.0 && wait <= 10.0);
    }

    #[test]
    fn window_expiry_allows_again() {
        let limiter = TriggerLimiter::with_window(Duration::from_millis(20));
        let id = Uuid::new_v4();
        assert!(limiter.check(id).is_ok());
        assert!(limiter.check(id).is_err());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check(id).is_ok());
    }

    #[test]
    fn jobs_are_limited_independently() {
        let limiter = TriggerLimiter::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(limiter.check(a).is_ok());
        assert!(limiter.check(b).is_ok());
    }

    #[test]
    fn stale_entries_are_collected_past_threshold() {
        let limiter = TriggerLimiter::with_window(Duration::from_millis(1));
        for _ in 0..GC_THRESHOLD {
            limiter.check(Uuid::new_v4()).unwrap();
        }
        assert_eq!(limiter.len(), GC_THRESHOLD);
        std::thread::sleep(Duration::from_millis(5));
        // The insert that crosses the threshold triggers collection of
        // everything older than twice the window.
        limiter.check(Uuid::new_v4()).unwrap();
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn wait_is_rounded_up_to_one_decimal() {
        let limiter = TriggerLimiter::new();
        let id = Uuid::new_v4();
        limiter.check(id).unwrap();
        let wait = limiter.check(id).unwrap_err();
        assert_eq!(wait, (wait * 10.0).round() / 10.0);
    }
}
