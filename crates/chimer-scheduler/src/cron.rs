//! Cron expression parser and evaluator.
//!
//! Supports the standard 5-field dialect `MIN HOUR DOM MON DOW` with
//! wildcards, ranges, lists, and steps, plus a 6-field variant with a
//! leading seconds field. Day-of-week accepts 0-7 (both 0 and 7 are
//! Sunday). When both day fields are restricted the expression matches
//! days satisfying either one, as classic cron does.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// How far ahead `next_after` searches before giving up. Covers a leap
/// cycle, so expressions like "0 0 29 2 *" still resolve.
const MAX_SEARCH_DAYS: i64 = 4 * 366 + 1;

/// A parsed cron expression. Field sets are bitmasks over the allowed
/// value range; computed once, matched many times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    expr: String,
    /// Present only for the 6-field dialect; 5-field fires at second 0.
    seconds: Option<u64>,
    minutes: u64,
    hours: u64,
    dom: u64,
    months: u64,
    dow: u64,
    dom_unrestricted: bool,
    dow_unrestricted: bool,
}

impl CronExpr {
    /// Parse a 5- or 6-field expression.
    pub fn parse(expr: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let rest: &[&str] = match fields.len() {
            5 => &fields,
            6 => &fields[1..],
            n => {
                return Err(format!(
                    "expected 5 or 6 fields (minute hour day-of-month month day-of-week), got {n}"
                ))
            }
        };
        let seconds = if fields.len() == 6 {
            Some(parse_field(fields[0], 0, 59)?.0)
        } else {
            None
        };
        let (minutes, _) = parse_field(rest[0], 0, 59)?;
        let (hours, _) = parse_field(rest[1], 0, 23)?;
        let (dom, dom_unrestricted) = parse_field(rest[2], 1, 31)?;
        let (months, _) = parse_field(rest[3], 1, 12)?;
        let (mut dow, dow_unrestricted) = parse_field(rest[4], 0, 7)?;
        // 7 is an alias for Sunday.
        if dow & (1 << 7) != 0 {
            dow = (dow & !(1 << 7)) | 1;
        }
        Ok(Self {
            expr: expr.to_string(),
            seconds,
            minutes,
            hours,
            dom,
            months,
            dow,
            dom_unrestricted,
            dow_unrestricted,
        })
    }

    /// The raw expression text.
    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// Whether this is the seconds-precision 6-field dialect.
    pub fn has_seconds(&self) -> bool {
        self.seconds.is_some()
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        if !bit(self.months, date.month()) {
            return false;
        }
        let dom_ok = bit(self.dom, date.day());
        let dow_ok = bit(self.dow, date.weekday().num_days_from_sunday());
        if self.dom_unrestricted || self.dow_unrestricted {
            dom_ok && dow_ok
        } else {
            dom_ok || dow_ok
        }
    }

    /// First fire instant strictly after `from`, evaluated as wall-clock
    /// time in `tz`. Returns `None` when no instant exists within the
    /// search horizon. Instants falling into a DST gap are skipped;
    /// ambiguous instants resolve to the earlier offset.
    pub fn next_after(&self, from: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local = from.with_timezone(&tz).naive_local();
        let sec_mask = self.seconds.unwrap_or(1);

        let mut date = local.date();
        let end = date.checked_add_signed(Duration::days(MAX_SEARCH_DAYS))?;
        while date <= end {
            if self.day_matches(date) {
                for h in set_values(self.hours, 23) {
                    for m in set_values(self.minutes, 59) {
                        for s in set_values(sec_mask, 59) {
                            let cand = date.and_hms_opt(h, m, s)?;
                            if cand <= local {
                                continue;
                            }
                            match tz.from_local_datetime(&cand) {
                                LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                                LocalResult::Ambiguous(earlier, _) => {
                                    return Some(earlier.with_timezone(&Utc))
                                }
                                LocalResult::None => continue,
                            }
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }

    /// Single fixed value of a field, if it has exactly one.
    fn single(mask: u64, max: u32) -> Option<u32> {
        let mut values = set_values(mask, max);
        let first = values.next()?;
        if values.next().is_none() {
            Some(first)
        } else {
            None
        }
    }

    /// Best-effort human description; unrecognized patterns fall back to
    /// the raw expression.
    pub fn describe(&self) -> String {
        let wide_days =
            self.dom_unrestricted && self.dow_unrestricted && self.months == full_mask(1, 12);
        if self.seconds.is_none() && wide_days {
            if self.minutes == full_mask(0, 59) && self.hours == full_mask(0, 23) {
                return "every minute".to_string();
            }
            if let Some(minute) = Self::single(self.minutes, 59) {
                if self.hours == full_mask(0, 23) {
                    return format!("hourly at minute {minute}");
                }
                if let Some(hour) = Self::single(self.hours, 23) {
                    return format!("daily at {hour:02}:{minute:02}");
                }
            }
        }
        format!("cron: {}", self.expr)
    }
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn full_mask(min: u32, max: u32) -> u64 {
    let mut mask = 0u64;
    for v in min..=max {
        mask |= 1 << v;
    }
    mask
}

fn set_values(mask: u64, max: u32) -> impl Iterator<Item = u32> {
    (0..=max).filter(move |v| mask & (1u64 << v) != 0)
}

/// Parse one field into a value bitmask. The boolean is true when the
/// field is a bare `*` (needed for the day-of-month/day-of-week rule).
fn parse_field(field: &str, min: u32, max: u32) -> Result<(u64, bool), String> {
    if field == "*" {
        return Ok((full_mask(min, max), true));
    }
    let mut mask = 0u64;
    for segment in field.split(',') {
        let (range, step) = match segment.split_once('/') {
            Some((range, step_raw)) => {
                let step: u32 = step_raw
                    .parse()
                    .map_err(|_| format!("invalid step in '{segment}'"))?;
                if step == 0 {
                    return Err(format!("step must be positive in '{segment}'"));
                }
                (range, step)
            }
            None => (segment, 1),
        };
        let stepped = segment.contains('/');
        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let lo: u32 = a.parse().map_err(|_| format!("invalid value '{a}'"))?;
            let hi: u32 = b.parse().map_err(|_| format!("invalid value '{b}'"))?;
            (lo, hi)
        } else {
            let v: u32 = range
                .parse()
                .map_err(|_| format!("invalid value '{range}'"))?;
            // "5/15" means start at 5 and step to the end of the range.
            if stepped {
                (v, max)
            } else {
                (v, v)
            }
        };
        if lo < min || hi > max || lo > hi {
            return Err(format!(
                "value out of range in '{segment}' (allowed {min}-{max})"
            ));
        }
        let mut v = lo;
        while v <= hi {
            mask |= 1u64 << v;
            v += step;
        }
    }
    Ok((mask, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn every_hour_on_the_hour() {
        let expr = CronExpr::parse("0 * * * *").unwrap();
        let next = expr.next_after(utc(2026, 3, 10, 12, 59, 30), Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 3, 10, 13, 0, 0));
    }

    #[test]
    fn specific_time_tomorrow() {
        let expr = CronExpr::parse("30 8 * * *").unwrap();
        let next = expr.next_after(utc(2026, 3, 10, 9, 0, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 3, 11, 8, 30, 0));
    }

    #[test]
    fn step_and_list_fields() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        let next = expr.next_after(utc(2026, 3, 10, 10, 2, 0), Tz::UTC).unwrap();
        assert_eq!(next.minute(), 15);

        let expr = CronExpr::parse("0,30 9-17 * * *").unwrap();
        let next = expr.next_after(utc(2026, 3, 10, 17, 30, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 3, 11, 9, 0, 0));

        let expr = CronExpr::parse("0 0-22/2 * * *").unwrap();
        let next = expr.next_after(utc(2026, 3, 10, 3, 0, 0), Tz::UTC).unwrap();
        assert_eq!(next.hour(), 4);
    }

    #[test]
    fn six_fields_have_seconds_precision() {
        let expr = CronExpr::parse("*/10 * * * * *").unwrap();
        assert!(expr.has_seconds());
        let next = expr.next_after(utc(2026, 3, 10, 10, 0, 3), Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 3, 10, 10, 0, 10));
    }

    #[test]
    fn five_fields_fire_at_second_zero() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        assert!(!expr.has_seconds());
        let next = expr.next_after(utc(2026, 3, 10, 10, 0, 30), Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 3, 10, 10, 1, 0));
    }

    #[test]
    fn dom_and_dow_match_either_when_both_restricted() {
        // 2026-03-10 is a Tuesday; "0 0 15 * 1" (15th OR Monday) should
        // fire on Monday the 16th, before the 15th of the next month.
        let expr = CronExpr::parse("0 0 15 * 1").unwrap();
        let next = expr.next_after(utc(2026, 3, 10, 0, 0, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 3, 15, 0, 0, 0)); // the 15th is a Sunday, comes first

        // With dom unrestricted, dow alone gates the day.
        let expr = CronExpr::parse("0 0 * * 1").unwrap();
        let next = expr.next_after(utc(2026, 3, 10, 0, 0, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 3, 16, 0, 0, 0));
    }

    #[test]
    fn dow_seven_is_sunday() {
        let a = CronExpr::parse("0 0 * * 0").unwrap();
        let b = CronExpr::parse("0 0 * * 7").unwrap();
        let from = utc(2026, 3, 10, 0, 0, 0);
        assert_eq!(a.next_after(from, Tz::UTC), b.next_after(from, Tz::UTC));
    }

    #[test]
    fn evaluates_in_configured_zone() {
        let expr = CronExpr::parse("0 8 * * *").unwrap();
        let tz: Tz = "America/New_York".parse().unwrap();
        // 11:00 UTC on 2026-06-10 is 07:00 in New York; 08:00 local is 12:00 UTC.
        let next = expr.next_after(utc(2026, 6, 10, 11, 0, 0), tz).unwrap();
        assert_eq!(next, utc(2026, 6, 10, 12, 0, 0));
    }

    #[test]
    fn leap_day_resolves() {
        let expr = CronExpr::parse("0 0 29 2 *").unwrap();
        let next = expr.next_after(utc(2026, 3, 1, 0, 0, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2028, 2, 29, 0, 0, 0));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(CronExpr::parse("bad").is_err());
        assert!(CronExpr::parse("* * * *").is_err());
        assert!(CronExpr::parse("60 * * * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("0 25 * * *").is_err());
        assert!(CronExpr::parse("0 0 32 * *").is_err());
        assert!(CronExpr::parse("0 0 * 13 *").is_err());
        assert!(CronExpr::parse("0 0 * * 8").is_err());
        assert!(CronExpr::parse("5-2 * * * *").is_err());
    }

    #[test]
    fn describe_common_patterns() {
        assert_eq!(CronExpr::parse("* * * * *").unwrap().describe(), "every minute");
        assert_eq!(
            CronExpr::parse("15 * * * *").unwrap().describe(),
            "hourly at minute 15"
        );
        assert_eq!(
            CronExpr::parse("30 8 * * *").unwrap().describe(),
            "daily at 08:30"
        );
        assert_eq!(
            CronExpr::parse("0 0 1 * *").unwrap().describe(),
            "cron: 0 0 1 * *"
        );
    }
}
