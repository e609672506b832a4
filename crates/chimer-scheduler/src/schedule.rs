//! The two schedule dialects, parsed once into a tagged union.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use chimer_core::error::{Error, Result};
use chimer_core::types::ScheduleType;

use crate::cron::CronExpr;

/// Smallest accepted repeat interval.
pub const MIN_REPEAT_SECONDS: u64 = 5;
/// Largest accepted repeat interval when the unit is days.
pub const MAX_REPEAT_DAYS: u64 = 30;

/// A validated schedule, ready to compute fire instants.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fixed interval, e.g. `"30s"`, `"5m"`, `"2h"`, `"1d"`.
    Repeat { every_ms: u64 },
    /// Cron expression evaluated in the configured zone.
    Cron(CronExpr),
}

impl Schedule {
    /// Parse and validate an expression in the given dialect.
    pub fn parse(raw: &str, kind: ScheduleType) -> Result<Self> {
        match kind {
            ScheduleType::Repeat => parse_repeat(raw).map(|every_ms| Schedule::Repeat { every_ms }),
            ScheduleType::Cron => CronExpr::parse(raw)
                .map(Schedule::Cron)
                .map_err(Error::InvalidSchedule),
        }
    }

    /// First fire instant strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Repeat { every_ms } => {
                from.checked_add_signed(Duration::milliseconds(*every_ms as i64))
            }
            Schedule::Cron(expr) => expr.next_after(from, tz),
        }
    }

    /// First `count` fire instants after now.
    pub fn upcoming(&self, count: usize, tz: Tz) -> Vec<DateTime<Utc>> {
        let mut instants = Vec::with_capacity(count);
        let mut from = Utc::now();
        for _ in 0..count {
            match self.next_after(from, tz) {
                Some(next) => {
                    instants.push(next);
                    from = next;
                }
                None => break,
            }
        }
        instants
    }

    /// Best-effort human description.
    pub fn describe(&self) -> String {
        match self {
            Schedule::Repeat { every_ms } => describe_interval(*every_ms),
            Schedule::Cron(expr) => expr.describe(),
        }
    }
}

/// Pure validation used at the API boundary and at registration.
pub fn validate(raw: &str, kind: ScheduleType) -> Result<()> {
    Schedule::parse(raw, kind).map(|_| ())
}

fn parse_repeat(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    let invalid = |msg: &str| Error::InvalidSchedule(format!("{msg} (got '{raw}')"));

    let Some(unit) = raw.chars().last() else {
        return Err(invalid("empty repeat expression"));
    };
    let digits = &raw[..raw.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(
            "repeat expression must be a number followed by s, m, h or d",
        ));
    }
    let value: u64 = digits
        .parse()
        .map_err(|_| invalid("interval value is too large"))?;
    if value == 0 {
        return Err(invalid("interval must be greater than zero"));
    }

    let unit_ms: u64 = match unit.to_ascii_lowercase() {
        's' => {
            if value < MIN_REPEAT_SECONDS {
                return Err(Error::InvalidSchedule(format!(
                    "Minimum interval is {MIN_REPEAT_SECONDS} seconds (got '{raw}')"
                )));
            }
            1_000
        }
        'm' => 60_000,
        'h' => 3_600_000,
        'd' => {
            if value > MAX_REPEAT_DAYS {
                return Err(Error::InvalidSchedule(format!(
                    "Maximum interval is {MAX_REPEAT_DAYS} days (got '{raw}')"
                )));
            }
            86_400_000
        }
        _ => {
            return Err(invalid(
                "repeat expression must be a number followed by s, m, h or d",
            ))
        }
    };

    value
        .checked_mul(unit_ms)
        .filter(|ms| *ms <= i64::MAX as u64)
        .ok_or_else(|| invalid("interval value is too large"))
}

fn describe_interval(every_ms: u64) -> String {
    let (value, unit) = if every_ms % 86_400_000 == 0 {
        (every_ms / 86_400_000, "day")
    } else if every_ms % 3_600_000 == 0 {
        (every_ms / 3_600_000, "hour")
    } else if every_ms % 60_000 == 0 {
        (every_ms / 60_000, "minute")
    } else {
        (every_ms / 1_000, "second")
    };
    if value == 1 {
        format!("every {unit}")
    } else {
        format!("every {value} {unit}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn repeat_units_convert_to_millis() {
        for (raw, expect) in [("5s", 5_000u64), ("2m", 120_000), ("1h", 3_600_000), ("1d", 86_400_000)] {
            match Schedule::parse(raw, ScheduleType::Repeat).unwrap() {
                Schedule::Repeat { every_ms } => assert_eq!(every_ms, expect, "{raw}"),
                _ => panic!("expected repeat"),
            }
        }
        // Case-insensitive unit.
        assert!(Schedule::parse("10S", ScheduleType::Repeat).is_ok());
    }

    #[test]
    fn repeat_rejects_too_fast() {
        let err = Schedule::parse("3s", ScheduleType::Repeat).unwrap_err();
        assert!(err.to_string().contains("Minimum interval is 5 seconds"));
    }

    #[test]
    fn repeat_bounds() {
        assert!(Schedule::parse("0m", ScheduleType::Repeat).is_err());
        assert!(Schedule::parse("31d", ScheduleType::Repeat).is_err());
        assert!(Schedule::parse("30d", ScheduleType::Repeat).is_ok());
        assert!(Schedule::parse("99999999999999999999s", ScheduleType::Repeat).is_err());
        assert!(Schedule::parse("5x", ScheduleType::Repeat).is_err());
        assert!(Schedule::parse("s", ScheduleType::Repeat).is_err());
        assert!(Schedule::parse("", ScheduleType::Repeat).is_err());
    }

    #[test]
    fn repeat_next_is_from_plus_interval() {
        let schedule = Schedule::parse("5s", ScheduleType::Repeat).unwrap();
        let from = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let next = schedule.next_after(from, Tz::UTC).unwrap();
        assert_eq!((next - from).num_milliseconds(), 5_000);
    }

    #[test]
    fn upcoming_has_exact_deltas() {
        let schedule = Schedule::parse("5s", ScheduleType::Repeat).unwrap();
        let instants = schedule.upcoming(5, Tz::UTC);
        assert_eq!(instants.len(), 5);
        for pair in instants.windows(2) {
            assert_eq!((pair[1] - pair[0]).num_milliseconds(), 5_000);
        }
    }

    #[test]
    fn cron_dialect_parses() {
        assert!(Schedule::parse("0 * * * *", ScheduleType::Cron).is_ok());
        assert!(Schedule::parse("not-cron", ScheduleType::Cron).is_err());
        assert!(validate("*/5 * * * *", ScheduleType::Cron).is_ok());
        assert!(validate("3s", ScheduleType::Repeat).is_err());
    }

    #[test]
    fn describe_repeat() {
        let s = Schedule::parse("5s", ScheduleType::Repeat).unwrap();
        assert_eq!(s.describe(), "every 5 seconds");
        let s = Schedule::parse("1h", ScheduleType::Repeat).unwrap();
        assert_eq!(s.describe(), "every hour");
        let s = Schedule::parse("90s", ScheduleType::Repeat).unwrap();
        assert_eq!(s.describe(), "every 90 seconds");
    }
}
