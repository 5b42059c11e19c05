//! Log store access.
//!
//! The store is reached through a single primitive: match rows for a site and time window,
//! group them by truncated timestamp, aggregate each requested field, sort, and optionally
//! limit. `PgLogStore` runs it as one SQL statement; `InMemoryLogStore` evaluates it over a
//! vector of records.

pub mod memory;
pub mod postgres;

use crate::time::Granularity;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use memory::InMemoryLogStore;
pub use postgres::PgLogStore;

/// One sensor reading set as stored for a site.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub site: String,
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, f64>,
}

impl LogRecord {
    pub fn new(site: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            site: site.into(),
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// Aggregated values for one bucket. A field with no contributing rows maps to `None`.
#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct BucketedPoint {
    #[serde(rename = "timestamp")]
    pub bucket_start: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub values: BTreeMap<String, Option<f64>>,
}

impl BucketedPoint {
    pub fn value(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied().flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
    Avg,
    Sum,
    Max,
    Min,
}

impl AggregateFn {
    pub const ALL: [AggregateFn; 4] = [
        AggregateFn::Avg,
        AggregateFn::Sum,
        AggregateFn::Max,
        AggregateFn::Min,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
        }
    }

    /// Folds the present values of one field; `None` when nothing contributed.
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let folded = match self {
            Self::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Self::Sum => values.iter().sum(),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        };
        Some(folded)
    }
}

impl fmt::Display for AggregateFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateFn {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|func| func.as_str() == raw.trim())
            .ok_or_else(|| {
                format!(
                    "func {raw} is invalid. Allowed: {}",
                    Self::ALL.map(AggregateFn::as_str).join(", ")
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    /// The `order` query value: `1` ascending, `-1` descending.
    pub fn from_sign(sign: i64) -> Option<Self> {
        match sign {
            1 => Some(Self::Ascending),
            -1 => Some(Self::Descending),
            _ => None,
        }
    }

    pub fn sign(self) -> i64 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }

    pub fn sql_keyword(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// A fully specified aggregation request. Rows match when
/// `site == site && after < timestamp <= until`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationPipeline {
    pub site: String,
    pub after: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub granularity: Granularity,
    pub fields: Vec<String>,
    pub func: AggregateFn,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store returned malformed row: {0}")]
    MalformedRow(String),
}

pub trait LogStore: Send + Sync {
    fn aggregate<'a>(
        &'a self,
        pipeline: &'a AggregationPipeline,
    ) -> BoxFuture<'a, Result<Vec<BucketedPoint>, StoreError>>;

    fn site_exists<'a>(&'a self, site: &'a str) -> BoxFuture<'a, Result<bool, StoreError>>;
}
