//! Clock helpers for spadesk
//!
//! Session timers are derived from persisted wall-clock timestamps, so every
//! time-sensitive component reads the clock through [`now`].
//!
//! # Mock Time for Development
//!
//! In debug builds, `SPADESK_MOCK_TIME` overrides the system time. The mock
//! clock keeps advancing at the real rate from the given instant, which makes
//! it possible to rehearse a closing at 03:00 or a day rollover.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 14:30:00`)

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "SPADESK_MOCK_TIME";

static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            let raw = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
            let parsed = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .and_then(|naive| Local.from_local_datetime(&naive).single());

            match parsed {
                Some(mock_dt) => {
                    let offset = mock_dt.signed_duration_since(chrono::Local::now());
                    tracing::info!(
                        mock_time = %raw,
                        offset_secs = offset.num_seconds(),
                        "Mock time enabled"
                    );
                    Some(offset)
                }
                None => {
                    tracing::warn!(
                        mock_time = %raw,
                        expected_format = "%Y-%m-%d %H:%M:%S",
                        "Invalid mock time, using system clock"
                    );
                    None
                }
            }
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Current local time, respecting `SPADESK_MOCK_TIME` in debug builds.
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();
    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Parse an ISO-8601 / RFC 3339 timestamp as stored by the hosted database.
///
/// Timestamps without an offset are interpreted as local time.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Local>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Local));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
}

/// Format a timestamp for persistence
pub fn format_timestamp(dt: &DateTime<Local>) -> String {
    dt.to_rfc3339()
}

/// Format a DateTime for display on the desk (HH:MM).
pub fn format_clock_time(dt: &DateTime<Local>) -> String {
    dt.format("%H:%M").to_string()
}

/// Wall-clock time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallClock {
    pub hour: u8,
    pub minute: u8,
}

impl WallClock {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    /// Parse `HH:MM`
    pub fn parse(s: &str) -> Result<Self, String> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| "Expected HH:MM format".to_string())?;
        let hour: u8 = h.trim().parse().map_err(|_| "Invalid hour".to_string())?;
        let minute: u8 = m.trim().parse().map_err(|_| "Invalid minute".to_string())?;
        Self::new(hour, minute).ok_or_else(|| "Hour must be 0-23 and minute 0-59".to_string())
    }

    pub fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour as u32, self.minute as u32, 0).unwrap_or(NaiveTime::MIN)
    }

    /// Returns seconds since midnight
    pub fn as_seconds_from_midnight(&self) -> u32 {
        (self.hour as u32) * 3600 + (self.minute as u32) * 60
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self { hour: 6, minute: 0 }
    }
}

/// The business day a timestamp belongs to.
///
/// Night shifts run past midnight, so anything before `day_starts_at`
/// is booked on the previous calendar day.
pub fn business_day(dt: &DateTime<Local>, day_starts_at: WallClock) -> NaiveDate {
    let secs = dt.hour() * 3600 + dt.minute() * 60 + dt.second();
    let date = dt.date_naive();
    if secs < day_starts_at.as_seconds_from_midnight() {
        date.pred_opt().unwrap_or(date)
    } else {
        date
    }
}

/// Elapsed time between two instants, zero if `to` precedes `from`
pub fn elapsed_between(from: &DateTime<Local>, to: &DateTime<Local>) -> Duration {
    to.signed_duration_since(*from).to_std().unwrap_or(Duration::ZERO)
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn parse_rfc3339_and_naive() {
        let dt = local(2025, 3, 14, 21, 5);
        let parsed = parse_timestamp(&format_timestamp(&dt)).unwrap();
        assert_eq!(parsed, dt);

        let naive = parse_timestamp("2025-03-14T21:05:00").unwrap();
        assert_eq!(naive, dt);

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn wall_clock_parse() {
        assert_eq!(WallClock::parse("06:30").unwrap(), WallClock::new(6, 30).unwrap());
        assert!(WallClock::parse("24:00").is_err());
        assert!(WallClock::parse("12:60").is_err());
        assert!(WallClock::parse("noon").is_err());
    }

    #[test]
    fn business_day_rolls_over_at_configured_hour() {
        let starts = WallClock::new(6, 0).unwrap();

        let late_night = local(2025, 3, 15, 2, 30);
        assert_eq!(
            business_day(&late_night, starts),
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
        );

        let morning = local(2025, 3, 15, 6, 0);
        assert_eq!(
            business_day(&morning, starts),
            NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()
        );
    }

    #[test]
    fn elapsed_never_negative() {
        let a = local(2025, 3, 15, 10, 0);
        let b = local(2025, 3, 15, 10, 30);
        assert_eq!(elapsed_between(&a, &b), Duration::from_secs(1800));
        assert_eq!(elapsed_between(&b, &a), Duration::ZERO);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m 5s");
    }
}
