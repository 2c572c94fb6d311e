//! Column encodings shared by the table modules
//!
//! Timestamps are UTC unix milliseconds, decimals are canonical strings and
//! optional key dimensions are stored as '' so unique indexes see one value.

use crate::error::AppError;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rusqlite::types::Type;
use std::fmt::Display;
use std::str::FromStr;

pub fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("invalid timestamp {}", millis)))
}

pub fn from_optional_millis(idx: usize, millis: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    millis.map(|m| from_millis(idx, m)).transpose()
}

/// Start of the clock hour containing `ts`
pub fn hour_window(ts: &DateTime<Utc>) -> DateTime<Utc> {
    let millis = to_millis(ts);
    let start = millis - millis.rem_euclid(3_600_000);
    Utc.timestamp_millis_opt(start).single().unwrap_or(*ts)
}

/// Minute bucket used by the market-record unique key
pub fn observation_minute(ts: &DateTime<Utc>) -> i64 {
    to_millis(ts).div_euclid(60_000)
}

pub fn key_text(value: Option<&str>) -> &str {
    value.unwrap_or("")
}

pub fn optional_key(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

pub fn decimal_text(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.normalize().to_string())
}

pub fn parse_decimal(idx: usize, value: Option<String>) -> rusqlite::Result<Option<Decimal>> {
    value
        .map(|s| {
            Decimal::from_str(&s)
                .map_err(|e| conversion_error(idx, Type::Text, format!("invalid decimal '{}': {}", s, e)))
        })
        .transpose()
}

/// Parse a TEXT column through `FromStr`
pub fn parse_text<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e: T::Err| conversion_error(idx, Type::Text, e.to_string()))
}

fn conversion_error(idx: usize, ty: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(AppError::Internal(message)))
}

/// True when the error is a UNIQUE / CHECK constraint violation
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hour_window_truncates() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        assert_eq!(hour_window(&ts), Utc.with_ymd_and_hms(2026, 3, 14, 15, 0, 0).unwrap());
    }

    #[test]
    fn test_observation_minute_groups_seconds() {
        let a = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 1).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 59).unwrap();
        let c = Utc.with_ymd_and_hms(2026, 3, 14, 15, 10, 0).unwrap();
        assert_eq!(observation_minute(&a), observation_minute(&b));
        assert_ne!(observation_minute(&b), observation_minute(&c));
    }

    #[test]
    fn test_decimal_text_is_canonical() {
        let value = Decimal::from_str("145.00").unwrap();
        assert_eq!(decimal_text(Some(value)), Some("145".to_string()));
        assert_eq!(parse_decimal(0, Some("145".to_string())).unwrap(), Some(value));
    }
}
