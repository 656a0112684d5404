//! Per-cell coercion into target types.
//!
//! Each function returns `Ok(None)` for a missing cell, `Ok(Some(v))` for a
//! successful coercion and `Err(Unparseable)` otherwise. The engine attaches
//! column and row context to the error.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::frame::Cell;

/// Largest magnitude an i64 can have and still be exact as f64.
pub const MAX_EXACT_F64_INT: i64 = 1 << 53;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unparseable;

pub type CoerceResult<T> = Result<Option<T>, Unparseable>;

/// Datetime layouts tried in order after RFC 3339.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
    "%d.%m.%Y %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d.%m.%Y"];

pub fn to_f64(cell: &Cell) -> CoerceResult<f64> {
    match cell {
        Cell::Null => Ok(None),
        Cell::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
        Cell::Int(i) => Ok(Some(*i as f64)),
        Cell::Float(f) => Ok(Some(*f)),
        Cell::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed.parse::<f64>().map(Some).map_err(|_| Unparseable)
        }
    }
}

/// Integral values pass through; decimals truncate toward zero.
pub fn to_i64(cell: &Cell) -> CoerceResult<i64> {
    match cell {
        Cell::Null => Ok(None),
        Cell::Bool(b) => Ok(Some(i64::from(*b))),
        Cell::Int(i) => Ok(Some(*i)),
        Cell::Float(f) => truncate_f64(*f).map(Some),
        Cell::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            if let Ok(v) = trimmed.parse::<i64>() {
                return Ok(Some(v));
            }
            let v = trimmed.parse::<f64>().map_err(|_| Unparseable)?;
            truncate_f64(v).map(Some)
        }
    }
}

fn truncate_f64(v: f64) -> Result<i64, Unparseable> {
    if !v.is_finite() {
        return Err(Unparseable);
    }
    let t = v.trunc();
    if t < i64::MIN as f64 || t >= i64::MAX as f64 {
        return Err(Unparseable);
    }
    Ok(t as i64)
}

pub fn to_bool(cell: &Cell) -> CoerceResult<bool> {
    match cell {
        Cell::Null => Ok(None),
        Cell::Bool(b) => Ok(Some(*b)),
        Cell::Int(i) => Ok(Some(*i != 0)),
        Cell::Float(f) if f.is_nan() => Err(Unparseable),
        Cell::Float(f) => Ok(Some(*f != 0.0)),
        Cell::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            match trimmed.to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" | "on" => Ok(Some(true)),
                "false" | "f" | "no" | "n" | "0" | "off" => Ok(Some(false)),
                other => match other.parse::<f64>() {
                    Ok(v) if !v.is_nan() => Ok(Some(v != 0.0)),
                    _ => Err(Unparseable),
                },
            }
        }
    }
}

/// Text is kept verbatim (including surrounding whitespace); typed cells are
/// rendered with their display form.
pub fn to_text(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Null => None,
        Cell::Text(s) if s.trim().is_empty() => None,
        other => Some(other.to_string()),
    }
}

/// Nanoseconds since the Unix epoch. Numeric cells are already nanoseconds.
pub fn to_timestamp_nanos(cell: &Cell) -> CoerceResult<i64> {
    match cell {
        Cell::Null => Ok(None),
        Cell::Bool(_) => Err(Unparseable),
        Cell::Int(i) => Ok(Some(*i)),
        Cell::Float(f) => truncate_f64(*f).map(Some),
        Cell::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            parse_datetime(trimmed)
                .and_then(|dt| dt.and_utc().timestamp_nanos_opt())
                .map(Some)
                .ok_or(Unparseable)
        }
    }
}

pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Whether converting this cell to f64 drops integer precision.
pub fn loses_precision_as_f64(cell: &Cell) -> bool {
    match cell {
        Cell::Int(i) => i.unsigned_abs() > MAX_EXACT_F64_INT as u64,
        Cell::Text(s) => s
            .trim()
            .parse::<i128>()
            .map(|v| v.unsigned_abs() > MAX_EXACT_F64_INT as u128)
            .unwrap_or(false),
        _ => false,
    }
}
