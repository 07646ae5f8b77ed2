//! Day numbering helpers.
//!
//! A day number counts whole UTC days since the Unix epoch. Partitions are
//! keyed by it.

use crate::error::{ArchiveError, Result};
use crate::message::{day_of, DayNumber, Timestamp, MS_PER_DAY};
use chrono::DateTime;
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current time in milliseconds since the Unix epoch.
///
/// # Examples
/// ```rust,ignore
/// use dcp_archive::lifecycle::partition::current_timestamp_millis;
///
/// let now = current_timestamp_millis()?;
/// ```
pub fn current_timestamp_millis() -> Result<Timestamp> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| ArchiveError::Clock(err.to_string()))?;
    Ok(now.as_millis() as Timestamp)
}

/// Returns today's day number.
///
/// # Examples
/// ```rust,ignore
/// use dcp_archive::lifecycle::partition::today;
///
/// let day = today()?;
/// ```
pub fn today() -> Result<DayNumber> {
    Ok(day_of(current_timestamp_millis()?))
}

/// Returns the first millisecond of `day`.
///
/// # Examples
/// ```rust,ignore
/// use dcp_archive::lifecycle::partition::day_start;
///
/// assert_eq!(day_start(1), 86_400_000);
/// ```
pub fn day_start(day: DayNumber) -> Timestamp {
    i64::from(day) * MS_PER_DAY
}

/// Formats `day` as `YYYY-MM-DD` for logs.
///
/// # Examples
/// ```rust,ignore
/// use dcp_archive::lifecycle::partition::day_label;
///
/// assert_eq!(day_label(0), "1970-01-01");
/// ```
pub fn day_label(day: DayNumber) -> String {
    DateTime::from_timestamp_millis(day_start(day))
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| format!("day {day}"))
}
