//! Time expressions used by criteria bounds.
//!
//! Accepted forms, all UTC:
//!
//! ```text
//! now
//! now - 2 hours          now + 1 day          now-90minutes
//! 2024/045 14:30:00.250  2024/045 14:30       2024/045
//! 24045143000            (YYDDDHHMMSS)
//! ```

use crate::message::header::expand_year;
use crate::message::Timestamp;
use chrono::{DateTime, NaiveDate, NaiveTime, Timelike};
use std::fmt;
use std::str::FromStr;

/// A time bound that may be relative to the moment it is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    /// The evaluation instant.
    Now,
    /// Seconds offset from the evaluation instant.
    Relative(i64),
    /// Fixed instant in ms since epoch.
    Absolute(Timestamp),
}

impl TimeSpec {
    /// Resolves the bound against `now` (ms since epoch).
    pub fn evaluate(&self, now: Timestamp) -> Timestamp {
        match *self {
            Self::Now => now,
            Self::Relative(secs) => now.saturating_add(secs.saturating_mul(1000)),
            Self::Absolute(ts) => ts,
        }
    }
}

fn unit_seconds(unit: &str) -> Option<i64> {
    match unit.to_ascii_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => Some(1),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(60),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(3_600),
        "d" | "day" | "days" => Some(86_400),
        "w" | "week" | "weeks" => Some(604_800),
        _ => None,
    }
}

fn parse_relative(rest: &str) -> Result<TimeSpec, String> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(TimeSpec::Now);
    }
    let (sign, rest) = match rest.as_bytes()[0] {
        b'-' => (-1, &rest[1..]),
        b'+' => (1, &rest[1..]),
        _ => return Err(format!("expected '+' or '-' after 'now', got '{rest}'")),
    };
    let rest = rest.trim();
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let count: i64 = rest[..digits_end]
        .parse()
        .map_err(|_| format!("expected a number in '{rest}'"))?;
    let unit = rest[digits_end..].trim();
    let scale = if unit.is_empty() {
        1
    } else {
        unit_seconds(unit).ok_or_else(|| format!("unknown time unit '{unit}'"))?
    };
    count
        .checked_mul(scale)
        .and_then(|secs| secs.checked_mul(sign))
        .map(TimeSpec::Relative)
        .ok_or_else(|| format!("time offset out of range in '{rest}'"))
}

fn parse_time_of_day(text: &str) -> Result<NaiveTime, String> {
    let (hms, millis) = match text.split_once('.') {
        Some((hms, frac)) => {
            if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format!("bad fraction in '{text}'"));
            }
            let millis: u32 = format!("{frac:0<3}")[..3]
                .parse()
                .map_err(|_| format!("bad fraction in '{text}'"))?;
            (hms, millis)
        }
        None => (text, 0),
    };
    let parts: Vec<u32> = hms
        .split(':')
        .map(|p| p.parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("bad time of day '{text}'"))?;
    let (h, m, s) = match parts.as_slice() {
        [h, m] => (*h, *m, 0),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(format!("bad time of day '{text}'")),
    };
    NaiveTime::from_hms_milli_opt(h, m, s, millis)
        .ok_or_else(|| format!("time of day out of range '{text}'"))
}

fn parse_absolute(text: &str) -> Result<TimeSpec, String> {
    let (date, time) = match text.split_once(char::is_whitespace) {
        Some((date, time)) => (date, Some(time.trim())),
        None => (text, None),
    };
    let (year, doy) = date
        .split_once('/')
        .ok_or_else(|| format!("unrecognized time '{text}'"))?;
    let year: i32 = year.parse().map_err(|_| format!("bad year in '{text}'"))?;
    let doy: u32 = doy.parse().map_err(|_| format!("bad day of year in '{text}'"))?;
    let date = NaiveDate::from_yo_opt(year, doy)
        .ok_or_else(|| format!("day of year out of range in '{text}'"))?;
    let time = match time {
        Some(t) => parse_time_of_day(t)?,
        None => NaiveTime::MIN,
    };
    Ok(TimeSpec::Absolute(
        date.and_time(time).and_utc().timestamp_millis(),
    ))
}

fn parse_compact(text: &str) -> Result<TimeSpec, String> {
    let num = |range: std::ops::Range<usize>| -> Result<u32, String> {
        text[range]
            .parse()
            .map_err(|_| format!("bad compact time '{text}'"))
    };
    let date = NaiveDate::from_yo_opt(expand_year(num(0..2)?), num(2..5)?)
        .ok_or_else(|| format!("day of year out of range in '{text}'"))?;
    let dt = date
        .and_hms_opt(num(5..7)?, num(7..9)?, num(9..11)?)
        .ok_or_else(|| format!("time out of range in '{text}'"))?;
    Ok(TimeSpec::Absolute(dt.and_utc().timestamp_millis()))
}

impl FromStr for TimeSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if let Some(rest) = text
            .get(..3)
            .filter(|head| head.eq_ignore_ascii_case("now"))
            .map(|_| &text[3..])
        {
            return parse_relative(rest);
        }
        if text.len() == 11 && text.bytes().all(|b| b.is_ascii_digit()) {
            return parse_compact(text);
        }
        parse_absolute(text)
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Now => f.write_str("now"),
            Self::Relative(secs) => {
                let sign = if secs < 0 { '-' } else { '+' };
                let abs = secs.unsigned_abs();
                let (count, unit) = [(86_400, "days"), (3_600, "hours"), (60, "minutes")]
                    .into_iter()
                    .find(|(scale, _)| abs != 0 && abs % scale == 0)
                    .map_or((abs, "seconds"), |(scale, unit)| (abs / scale, unit));
                write!(f, "now {sign} {count} {unit}")
            }
            Self::Absolute(ts) => match DateTime::from_timestamp_millis(ts) {
                Some(dt) if dt.nanosecond() == 0 => write!(f, "{}", dt.format("%Y/%j %H:%M:%S")),
                Some(dt) => write!(f, "{}", dt.format("%Y/%j %H:%M:%S%.3f")),
                None => write!(f, "{ts}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEB_14_2024_1430: Timestamp = 1_707_921_000_000;

    #[test]
    fn test_parse_now_forms() {
        assert_eq!("now".parse::<TimeSpec>(), Ok(TimeSpec::Now));
        assert_eq!("NOW - 2 hours".parse::<TimeSpec>(), Ok(TimeSpec::Relative(-7200)));
        assert_eq!("now+1day".parse::<TimeSpec>(), Ok(TimeSpec::Relative(86_400)));
        assert_eq!("now - 90 minutes".parse::<TimeSpec>(), Ok(TimeSpec::Relative(-5400)));
        assert!("now - 2 fortnights".parse::<TimeSpec>().is_err());
        assert!("now 2 hours".parse::<TimeSpec>().is_err());
    }

    #[test]
    fn test_non_ascii_input_is_rejected() {
        assert!("éé".parse::<TimeSpec>().is_err());
        assert!("né".parse::<TimeSpec>().is_err());
        assert!("2024/045 14:30:00.ééé".parse::<TimeSpec>().is_err());
        assert!("2024/045 14:30:00.".parse::<TimeSpec>().is_err());
    }

    #[test]
    fn test_offset_overflow_is_rejected() {
        let err = "now - 999999999999999999 days".parse::<TimeSpec>().unwrap_err();
        assert!(err.contains("out of range"), "{err}");
        assert_eq!(
            "now - 9223372036854775807".parse::<TimeSpec>(),
            Ok(TimeSpec::Relative(-i64::MAX))
        );
    }

    #[test]
    fn test_parse_absolute_forms() {
        assert_eq!(
            "2024/045 14:30:00".parse::<TimeSpec>(),
            Ok(TimeSpec::Absolute(FEB_14_2024_1430))
        );
        assert_eq!(
            "2024/045 14:30".parse::<TimeSpec>(),
            Ok(TimeSpec::Absolute(FEB_14_2024_1430))
        );
        assert_eq!(
            "2024/045 14:30:00.25".parse::<TimeSpec>(),
            Ok(TimeSpec::Absolute(FEB_14_2024_1430 + 250))
        );
        assert_eq!(
            "24045143000".parse::<TimeSpec>(),
            Ok(TimeSpec::Absolute(FEB_14_2024_1430))
        );
        assert_eq!(
            "2024/045".parse::<TimeSpec>(),
            Ok(TimeSpec::Absolute(FEB_14_2024_1430 - 52_200_000))
        );
        assert!("2024/400 00:00".parse::<TimeSpec>().is_err());
        assert!("yesterday".parse::<TimeSpec>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        for spec in [
            TimeSpec::Now,
            TimeSpec::Relative(-7200),
            TimeSpec::Relative(90),
            TimeSpec::Relative(3 * 86_400),
            TimeSpec::Absolute(FEB_14_2024_1430),
            TimeSpec::Absolute(FEB_14_2024_1430 + 7),
        ] {
            assert_eq!(spec.to_string().parse::<TimeSpec>(), Ok(spec));
        }
        assert_eq!(TimeSpec::Relative(-7200).to_string(), "now - 2 hours");
        assert_eq!(
            TimeSpec::Absolute(FEB_14_2024_1430).to_string(),
            "2024/045 14:30:00"
        );
    }

    #[test]
    fn test_evaluate() {
        assert_eq!(TimeSpec::Now.evaluate(5_000), 5_000);
        assert_eq!(TimeSpec::Relative(-2).evaluate(5_000), 3_000);
        assert_eq!(TimeSpec::Absolute(10).evaluate(5_000), 10);
    }
}
