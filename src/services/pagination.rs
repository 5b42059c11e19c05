//! Opaque page tokens for the logs endpoint.
//!
//! A token is a UTC timestamp rendered as the fixed-width digit string
//! `YYYYMMDDHHMMSSFFFFFF` (microsecond precision). Callers treat it as opaque; the server
//! decodes it back into the exact boundary it was built from.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};

pub const TOKEN_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("token {token} is invalid")]
pub struct InvalidToken {
    pub token: String,
}

/// Encodes `ts` as a page token. Sub-microsecond precision is dropped.
///
/// Only years 0..=9999 fit the fixed-width layout; callers never see other values because
/// every bound comes from the store, which stores microsecond timestamps in that range.
pub fn encode(ts: DateTime<Utc>) -> String {
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}{:06}",
        ts.year(),
        ts.month(),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second(),
        ts.timestamp_subsec_micros().min(999_999),
    )
}

pub fn decode(token: &str) -> Result<DateTime<Utc>, InvalidToken> {
    let invalid = || InvalidToken {
        token: token.to_string(),
    };
    if token.len() != TOKEN_LEN || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let field = |range: std::ops::Range<usize>| -> Result<u32, InvalidToken> {
        token[range].parse::<u32>().map_err(|_| invalid())
    };
    let year = i32::try_from(field(0..4)?).map_err(|_| invalid())?;
    let (month, day) = (field(4..6)?, field(6..8)?);
    let (hour, minute, second) = (field(8..10)?, field(10..12)?, field(12..14)?);
    let micros = field(14..20)?;
    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_micro_opt(hour, minute, second, micros))
        .ok_or_else(invalid)?;
    Ok(Utc.from_utc_datetime(&naive))
}
