//! Time helpers for building run windows in the sources' local timezone.
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

pub const EASTERN: Tz = chrono_tz::America::New_York;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TimeError {
    #[error("cannot parse {0:?} as a local timestamp")]
    Unparseable(String),
    #[error("{0:?} does not exist or is ambiguous in the local timezone")]
    NonexistentLocal(String),
}

/// Parse `YYYY-MM-DD HH:MM` (or a bare `YYYY-MM-DD`) as US Eastern time.
pub fn parse_eastern(text: &str) -> Result<DateTime<Tz>, TimeError> {
    parse_local(text, EASTERN)
}

pub fn parse_local(text: &str, tz: Tz) -> Result<DateTime<Tz>, TimeError> {
    let trimmed = text.trim();
    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|_| TimeError::Unparseable(text.to_string()))?;

    tz.from_local_datetime(&naive)
        .single()
        .ok_or_else(|| TimeError::NonexistentLocal(text.to_string()))
}

/// Floor a UTC instant to a multiple of `step_secs` since the unix epoch.
pub fn floor_to(t: DateTime<Utc>, step_secs: i64) -> DateTime<Utc> {
    let secs = t.timestamp().div_euclid(step_secs) * step_secs;
    DateTime::from_timestamp(secs, 0).unwrap_or(t)
}

/// Visualization windows: each start date shifted back by `offset_hours`
/// (a day "starts" at 9pm the previous evening with the default offset of 3)
/// and lasting `duration_hours`.
pub fn day_windows(
    start_dates: &[&str],
    duration_hours: i64,
    offset_hours: i64,
) -> Result<Vec<(DateTime<Tz>, DateTime<Tz>)>, TimeError> {
    start_dates
        .iter()
        .map(|date| {
            let start = parse_eastern(date)? - Duration::hours(offset_hours);
            Ok((start, start + Duration::hours(duration_hours)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_eastern_offsets() {
        let summer = parse_eastern("2020-07-01 00:00").unwrap();
        assert_eq!(summer.with_timezone(&Utc).hour(), 4);

        let winter = parse_eastern("2020-01-01 00:00").unwrap();
        assert_eq!(winter.with_timezone(&Utc).hour(), 5);

        let bare = parse_eastern("2020-03-30").unwrap();
        assert_eq!(bare, parse_eastern("2020-03-30 00:00").unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_eastern("yesterday"), Err(TimeError::Unparseable(_))));
        // spring-forward gap
        assert!(matches!(
            parse_eastern("2020-03-08 02:30"),
            Err(TimeError::NonexistentLocal(_))
        ));
    }

    #[test]
    fn test_day_windows() {
        let windows = day_windows(&["2019-04-23", "2020-02-05"], 24, 3).unwrap();
        assert_eq!(windows.len(), 2);
        let (start, end) = windows[0].clone();
        assert_eq!(start.hour(), 21);
        assert_eq!((end - start).num_hours(), 24);
    }

    #[test]
    fn test_floor_to() {
        let t = DateTime::from_timestamp(6 * 3600 + 1234, 0).unwrap();
        assert_eq!(floor_to(t, 6 * 3600).timestamp(), 6 * 3600);
    }
}
