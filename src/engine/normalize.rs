//! Date/time-of-day strings to absolute UTC instants.
//!
//! Everything here works in one fixed calendar (UTC). Display offsets are
//! applied at the render boundary only (see `crate::view`).

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Weekday};

use crate::model::Ms;

use super::EngineError;

/// `d` matches an ASCII digit, anything else must match literally.
fn has_shape(s: &str, shape: &str) -> bool {
    s.len() == shape.len()
        && s.bytes().zip(shape.bytes()).all(|(c, p)| match p {
            b'd' => c.is_ascii_digit(),
            _ => c == p,
        })
}

/// Parse a strict `YYYY-MM-DD` calendar date.
pub fn parse_date(field: &'static str, s: &str) -> Result<NaiveDate, EngineError> {
    if !has_shape(s, "dddd-dd-dd") {
        return Err(EngineError::malformed(field, s));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| EngineError::malformed(field, s))
}

/// Parse a strict 24-hour `HH:MM` time of day.
pub fn parse_time(field: &'static str, s: &str) -> Result<NaiveTime, EngineError> {
    if !has_shape(s, "dd:dd") {
        return Err(EngineError::malformed(field, s));
    }
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| EngineError::malformed(field, s))
}

/// Combine a typed date and time of day into UTC milliseconds.
pub fn at(date: NaiveDate, time: NaiveTime) -> Ms {
    date.and_time(time).and_utc().timestamp_millis()
}

/// `"YYYY-MM-DD"` + `"HH:MM"` → UTC milliseconds.
pub fn normalize(date: &str, time: &str) -> Result<Ms, EngineError> {
    Ok(at(parse_date("date", date)?, parse_time("time", time)?))
}

/// Weekday of an instant in UTC, independent of the host's local zone.
pub fn derive_weekday(t: Ms) -> Result<Weekday, EngineError> {
    DateTime::from_timestamp_millis(t)
        .map(|dt| dt.weekday())
        .ok_or(EngineError::LimitExceeded("timestamp out of range"))
}

/// Calendar date of an instant in UTC.
pub fn derive_date(t: Ms) -> Result<NaiveDate, EngineError> {
    DateTime::from_timestamp_millis(t)
        .map(|dt| dt.date_naive())
        .ok_or(EngineError::LimitExceeded("timestamp out of range"))
}
