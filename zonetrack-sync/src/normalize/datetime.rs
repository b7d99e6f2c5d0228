//! Date and time cell parsing
//!
//! Cells arrive either as text (whatever format the exporter or an older
//! container used) or as a Jet/OLE automation date serial. The date field
//! contributes only its calendar date and the time field only its wall-clock
//! time, so both are parsed into a full instant first and then projected.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde_json::Value;

/// Day zero of the OLE automation date scale
const OLE_EPOCH: (i32, u32, u32) = (1899, 12, 30);

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Date/time text forms, tried in order after RFC 3339
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

/// Date-only text forms (midnight)
///
/// Two-digit years come first: `%Y` would otherwise read `24` as year 24.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y"];

/// Bare time-of-day forms, accepted only in the time field
const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M", "%I:%M:%S %p", "%I:%M %p"];

/// Calendar date carried by a date cell
pub fn parse_date_value(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_ole_serial).map(|dt| dt.date()),
        Value::String(s) => parse_instant(s.trim()).map(|dt| dt.date()),
        _ => None,
    }
}

/// Wall-clock time carried by a time cell
pub fn parse_time_value(value: &Value) -> Option<NaiveTime> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_ole_serial).map(|dt| dt.time()),
        Value::String(s) => {
            let s = s.trim();
            parse_instant(s)
                .map(|dt| dt.time())
                .or_else(|| {
                    TIME_FORMATS
                        .iter()
                        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
                })
        }
        _ => None,
    }
}

/// Parse a text cell that names a calendar instant
///
/// Offsets in RFC 3339 text are ignored: the components are taken as written.
fn parse_instant(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Convert an OLE automation date (days since 1899-12-30, fraction = time of
/// day) to a naive instant, rounded to the millisecond
pub fn from_ole_serial(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() {
        return None;
    }
    let millis = (serial * MILLIS_PER_DAY).round();
    if millis.abs() > i64::MAX as f64 / 2.0 {
        return None;
    }

    let (y, m, d) = OLE_EPOCH;
    let epoch = NaiveDate::from_ymd_opt(y, m, d)?.and_time(NaiveTime::MIN);
    epoch.checked_add_signed(TimeDelta::try_milliseconds(millis as i64)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_date_text_forms() {
        let expected = ymd(2024, 1, 10);
        for text in [
            "2024-01-10",
            "2024-01-10T00:00:00",
            "2024-01-10 17:45:12.250",
            "2024-01-10T23:30:00+05:00",
            "01/10/2024",
            "01/10/24",
            "01/10/2024 08:15:00",
        ] {
            assert_eq!(parse_date_value(&json!(text)), Some(expected), "{}", text);
        }
    }

    #[test]
    fn test_rfc3339_keeps_written_components() {
        assert_eq!(parse_date_value(&json!("2024-01-10T23:30:00-08:00")), Some(ymd(2024, 1, 10)));
        assert_eq!(parse_time_value(&json!("2024-01-10T23:30:00Z")), Some(hms(23, 30, 0)));
    }

    #[test]
    fn test_time_text_forms() {
        assert_eq!(parse_time_value(&json!("1899-12-30T14:30:00")), Some(hms(14, 30, 0)));
        assert_eq!(parse_time_value(&json!("14:30:05")), Some(hms(14, 30, 5)));
        assert_eq!(parse_time_value(&json!("14:30")), Some(hms(14, 30, 0)));
        assert_eq!(parse_time_value(&json!("2:30:00 PM")), Some(hms(14, 30, 0)));
        assert_eq!(parse_time_value(&json!("12:05 am")), Some(hms(0, 5, 0)));
    }

    #[test]
    fn test_bare_time_is_not_a_date() {
        assert_eq!(parse_date_value(&json!("14:30:00")), None);
    }

    #[test]
    fn test_garbage_rejected() {
        assert_eq!(parse_date_value(&json!("yesterday")), None);
        assert_eq!(parse_date_value(&json!("2024-13-45")), None);
        assert_eq!(parse_time_value(&json!("25:99")), None);
        assert_eq!(parse_time_value(&json!(true)), None);
        assert_eq!(parse_date_value(&json!([2024, 1, 10])), None);
    }

    #[test]
    fn test_ole_serials() {
        // 45301 = 2024-01-10, 0.6041666… = 14:30
        assert_eq!(parse_date_value(&json!(45301)), Some(ymd(2024, 1, 10)));
        assert_eq!(parse_date_value(&json!(45301.75)), Some(ymd(2024, 1, 10)));
        assert_eq!(parse_time_value(&json!(14.5 / 24.0)), Some(hms(14, 30, 0)));
        assert_eq!(parse_time_value(&json!(0)), Some(hms(0, 0, 0)));
        assert_eq!(from_ole_serial(f64::NAN), None);
        assert_eq!(from_ole_serial(1e300), None);
    }
}
