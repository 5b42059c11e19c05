use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bucket width for aggregation queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Years,
    Months,
    Days,
    Hours,
    Minutes,
}

impl Granularity {
    pub const ALL: [Granularity; 5] = [
        Granularity::Years,
        Granularity::Months,
        Granularity::Days,
        Granularity::Hours,
        Granularity::Minutes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Years => "years",
            Self::Months => "months",
            Self::Days => "days",
            Self::Hours => "hours",
            Self::Minutes => "minutes",
        }
    }

    /// Unit name understood by Postgres `date_trunc`.
    pub fn date_trunc_unit(self) -> &'static str {
        match self {
            Self::Years => "year",
            Self::Months => "month",
            Self::Days => "day",
            Self::Hours => "hour",
            Self::Minutes => "minute",
        }
    }

    /// Left-aligns `ts` to the start of its bucket. Idempotent.
    pub fn truncate(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        let naive = match self {
            Self::Years => NaiveDate::from_ymd_opt(date.year(), 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            Self::Months => date.with_day(1).and_then(|d| d.and_hms_opt(0, 0, 0)),
            Self::Days => date.and_hms_opt(0, 0, 0),
            Self::Hours => date.and_hms_opt(ts.hour(), 0, 0),
            Self::Minutes => date.and_hms_opt(ts.hour(), ts.minute(), 0),
        };
        naive
            .map(|naive| Utc.from_utc_datetime(&naive))
            .unwrap_or(ts)
    }

    /// Moves `ts` forward by `units` whole buckets (calendar-aware for months/years).
    pub fn advance(self, ts: DateTime<Utc>, units: u32) -> Option<DateTime<Utc>> {
        match self {
            Self::Years => ts.checked_add_months(Months::new(units.checked_mul(12)?)),
            Self::Months => ts.checked_add_months(Months::new(units)),
            Self::Days => ts.checked_add_signed(Duration::days(i64::from(units))),
            Self::Hours => ts.checked_add_signed(Duration::hours(i64::from(units))),
            Self::Minutes => ts.checked_add_signed(Duration::minutes(i64::from(units))),
        }
    }

    pub fn retreat(self, ts: DateTime<Utc>, units: u32) -> Option<DateTime<Utc>> {
        match self {
            Self::Years => ts.checked_sub_months(Months::new(units.checked_mul(12)?)),
            Self::Months => ts.checked_sub_months(Months::new(units)),
            Self::Days => ts.checked_sub_signed(Duration::days(i64::from(units))),
            Self::Hours => ts.checked_sub_signed(Duration::hours(i64::from(units))),
            Self::Minutes => ts.checked_sub_signed(Duration::minutes(i64::from(units))),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|g| g.as_str() == raw.trim())
            .ok_or_else(|| {
                format!(
                    "{raw} is invalid. Allowed: {}",
                    Self::ALL.map(Granularity::as_str).join(", ")
                )
            })
    }
}

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

/// Parses the date formats accepted on query strings. Naive values are taken as UTC.
pub fn parse_flexible_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Midnight (UTC) of the day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Granularity::Days.truncate(now)
}
