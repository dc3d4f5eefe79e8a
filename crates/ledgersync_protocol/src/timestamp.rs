//! Effective-timestamp parsing.
//!
//! Records carry their modification time as loosely-typed JSON: ISO 8601
//! strings with or without an offset, bare dates, or epoch milliseconds.
//! Merging and retention both go through [`Timestamp`] so they agree on what
//! "older" means.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Naive date-time layouts accepted after RFC 3339 fails.
const NAIVE_LAYOUTS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// The effective modification time of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    /// Neither `updatedAt` nor the business date is present.
    Missing,
    /// A value is present but could not be interpreted as a time.
    Unparseable,
    /// A parsed instant.
    At(DateTime<Utc>),
}

impl Timestamp {
    /// Interprets an optional JSON value as a timestamp.
    ///
    /// `null` and empty strings count as missing.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Timestamp::Missing,
            Some(Value::String(s)) if s.trim().is_empty() => Timestamp::Missing,
            Some(v) => match parse_timestamp_value(v) {
                Some(at) => Timestamp::At(at),
                None => Timestamp::Unparseable,
            },
        }
    }

    /// Returns the parsed instant, if any.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::At(at) => Some(*at),
            _ => None,
        }
    }

    /// Returns true if a value was present (parseable or not).
    pub fn is_present(&self) -> bool {
        !matches!(self, Timestamp::Missing)
    }
}

/// Parses a timestamp string.
///
/// Accepts RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.fff]` (read as UTC) and bare
/// `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }

    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parses a JSON timestamp value: a string, or epoch milliseconds.
pub fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => {
            let millis = match n.as_i64() {
                Some(millis) => millis,
                None => {
                    let float = n.as_f64()?;
                    if !float.is_finite() {
                        return None;
                    }
                    float as i64
                }
            };
            DateTime::from_timestamp_millis(millis)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn parses_rfc3339() {
        let at = parse_timestamp("2024-02-01T10:30:00.000Z").unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 2, 1, 10, 30, 0).unwrap());

        let offset = parse_timestamp("2024-02-01T10:30:00-03:00").unwrap();
        assert_eq!(offset, Utc.with_ymd_and_hms(2024, 2, 1, 13, 30, 0).unwrap());
    }

    #[test]
    fn parses_naive_and_date_only() {
        assert_eq!(
            parse_timestamp("2024-01-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_timestamp("2024-01-01T08:00:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
        );
        assert_eq!(
            parse_timestamp("2024-01-01 08:00:00.250").unwrap().timestamp_millis(),
            Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap().timestamp_millis() + 250
        );
    }

    #[test]
    fn parses_epoch_millis() {
        let at = parse_timestamp_value(&json!(1_704_067_200_000_i64)).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2024-13-45").is_none());
        assert!(parse_timestamp_value(&json!(true)).is_none());
    }

    #[test]
    fn classifies_values() {
        assert_eq!(Timestamp::from_value(None), Timestamp::Missing);
        assert_eq!(Timestamp::from_value(Some(&Value::Null)), Timestamp::Missing);
        assert_eq!(Timestamp::from_value(Some(&json!("  "))), Timestamp::Missing);
        assert_eq!(
            Timestamp::from_value(Some(&json!("not a date"))),
            Timestamp::Unparseable
        );
        assert!(Timestamp::from_value(Some(&json!("2024-01-01")))
            .instant()
            .is_some());
        assert!(Timestamp::Unparseable.is_present());
        assert!(!Timestamp::Missing.is_present());
    }
}
