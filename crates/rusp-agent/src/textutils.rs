// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Strict textual conversions for parameter values.
//!
//! Every value persisted in the database is a string; type is applied at
//! read/write time. These helpers are deliberately stricter than the
//! stdlib parsers: no surrounding whitespace, no sign on unsigned values,
//! no empty input.

use crate::error::{Result, UspError};

/// Parse an unsigned decimal value.
pub fn parse_unsigned(s: &str) -> Result<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UspError::InvalidValue(format!(
            "'{s}' is not an unsigned number"
        )));
    }
    s.parse::<u64>()
        .map_err(|_| UspError::InvalidValue(format!("'{s}' is out of range")))
}

/// Parse a signed decimal value.
pub fn parse_signed(s: &str) -> Result<i64> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UspError::InvalidValue(format!("'{s}' is not a number")));
    }
    s.parse::<i64>()
        .map_err(|_| UspError::InvalidValue(format!("'{s}' is out of range")))
}

/// Parse a boolean. Accepts the TR-181 forms `true`/`false`/`1`/`0`.
pub fn parse_bool(s: &str) -> Result<bool> {
    match s {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(UspError::InvalidValue(format!("'{s}' is not a boolean"))),
    }
}

/// Canonical textual form of a boolean.
pub fn format_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// The TR-106 "unknown time" sentinel.
pub const UNKNOWN_TIME: &str = "0001-01-01T00:00:00Z";

/// Validate an ISO 8601 / RFC 3339 UTC date-time of the form
/// `YYYY-MM-DDTHH:MM:SSZ`. The data model stores date-times textually;
/// only the shape is enforced here.
pub fn validate_datetime(s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    let shape_ok = bytes.len() == 20
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes[10] == b'T'
        && bytes[13] == b':'
        && bytes[16] == b':'
        && bytes[19] == b'Z'
        && [0, 1, 2, 3, 5, 6, 8, 9, 11, 12, 14, 15, 17, 18]
            .iter()
            .all(|&i| bytes[i].is_ascii_digit());
    if !shape_ok {
        return Err(UspError::InvalidValue(format!(
            "'{s}' is not a date-time (expected YYYY-MM-DDTHH:MM:SSZ)"
        )));
    }

    let field = |a: usize, b: usize| s[a..b].parse::<u32>().unwrap_or(0);
    let (month, day) = (field(5, 7), field(8, 10));
    let (hour, min, sec) = (field(11, 13), field(14, 16), field(17, 19));
    if !(1..=12).contains(&month) && s != UNKNOWN_TIME {
        return Err(UspError::InvalidValue(format!("'{s}' has month {month}")));
    }
    if !(1..=31).contains(&day) && s != UNKNOWN_TIME {
        return Err(UspError::InvalidValue(format!("'{s}' has day {day}")));
    }
    if hour > 23 || min > 59 || sec > 60 {
        return Err(UspError::InvalidValue(format!("'{s}' has an invalid time")));
    }
    Ok(())
}

/// Validate base64 text (standard alphabet, correct padding).
pub fn validate_base64(s: &str) -> Result<()> {
    let invalid = || UspError::InvalidValue(format!("'{s}' is not base64"));
    if s.len() % 4 != 0 {
        return Err(invalid());
    }
    let body = s.trim_end_matches('=');
    if s.len() - body.len() > 2 {
        return Err(invalid());
    }
    if !body
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
    {
        return Err(invalid());
    }
    Ok(())
}
