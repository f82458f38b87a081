//! Turning a [`Schedule`] into concrete fire times.

use crate::error::CronError;
use crate::types::Schedule;
use chrono::{DateTime, Utc};
use std::str::FromStr;

pub const MIN_INTERVAL_MS: u64 = 1000;

pub fn validate(schedule: &Schedule) -> Result<(), CronError> {
    match schedule {
        Schedule::Interval { ms } if *ms < MIN_INTERVAL_MS => Err(CronError::IntervalTooShort {
            min: MIN_INTERVAL_MS,
            actual: *ms,
        }),
        Schedule::Interval { .. } => Ok(()),
        Schedule::Cron { cronspec, tz } => {
            cron::Schedule::from_str(cronspec).map_err(|e| CronError::InvalidCronSpec {
                spec: cronspec.clone(),
                detail: e.to_string(),
            })?;
            if let Some(name) = tz {
                parse_tz(name)?;
            }
            Ok(())
        }
    }
}

/// The next fire time strictly after `from`. Always computed from the
/// schedule's own last `scheduled_time`, never from "now" — a process
/// that was down for an interval doesn't get a burst of catch-up fires,
/// it just resumes on the same cadence from where it left off.
pub fn next_fire(schedule: &Schedule, from: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
    match schedule {
        Schedule::Interval { ms } => Ok(from + chrono::Duration::milliseconds(*ms as i64)),
        Schedule::Cron { cronspec, tz } => next_cron_fire(cronspec, tz.as_deref(), from),
    }
}

fn next_cron_fire(cronspec: &str, tz: Option<&str>, from: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
    let schedule = cron::Schedule::from_str(cronspec).map_err(|e| CronError::InvalidCronSpec {
        spec: cronspec.to_string(),
        detail: e.to_string(),
    })?;
    let tz = match tz {
        Some(name) => parse_tz(name)?,
        None => chrono_tz::UTC,
    };
    let from_tz = from.with_timezone(&tz);
    let next = schedule.after(&from_tz).next().ok_or_else(|| CronError::InvalidCronSpec {
        spec: cronspec.to_string(),
        detail: "schedule never fires again".to_string(),
    })?;
    Ok(next.with_timezone(&Utc))
}

fn parse_tz(name: &str) -> Result<chrono_tz::Tz, CronError> {
    name.parse().map_err(|_| CronError::UnknownTimezone(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn interval_below_one_second_is_rejected() {
        let err = validate(&Schedule::Interval { ms: 999 }).unwrap_err();
        assert!(matches!(err, CronError::IntervalTooShort { min: 1000, actual: 999 }));
    }

    #[test]
    fn interval_fires_at_a_fixed_offset_from_the_last_fire() {
        let from = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let next = next_fire(&Schedule::Interval { ms: 5000 }, from).unwrap();
        assert_eq!(next, from + chrono::Duration::seconds(5));
    }

    #[test]
    fn invalid_cronspec_is_rejected_at_validation_time() {
        let err = validate(&Schedule::Cron {
            cronspec: "not a cron expression".to_string(),
            tz: None,
        })
        .unwrap_err();
        assert!(matches!(err, CronError::InvalidCronSpec { .. }));
    }

    #[test]
    fn cron_schedule_honors_timezone() {
        // Fires at 09:00 every day; from just after midnight UTC on a
        // date where US/Eastern is 5 hours behind, the next fire should
        // land at 14:00 UTC.
        let from = DateTime::parse_from_rfc3339("2026-01-01T00:05:00Z").unwrap().with_timezone(&Utc);
        let schedule = Schedule::Cron {
            cronspec: "0 0 9 * * * *".to_string(),
            tz: Some("America/New_York".to_string()),
        };
        let next = next_fire(&schedule, from).unwrap();
        assert_eq!(next, DateTime::parse_from_rfc3339("2026-01-01T14:00:00Z").unwrap().with_timezone(&Utc));
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let err = validate(&Schedule::Cron {
            cronspec: "0 0 9 * * * *".to_string(),
            tz: Some("Nowhere/Imaginary".to_string()),
        })
        .unwrap_err();
        assert!(matches!(err, CronError::UnknownTimezone(_)));
    }
}
