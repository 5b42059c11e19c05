//! Hour-of-day rate-of-change envelopes.
//!
//! Training data yields, for every local hour, the band of typical changes over `delta`
//! buckets. A test point is abnormal when its own change falls outside its hour's band.

use crate::error::DashboardResult;
use crate::services::aggregator::TimeBucketAggregator;
use crate::services::preprocess::{self, Frame};
use crate::services::stats::{forward_fill, quantile};
use crate::services::store::{AggregateFn, AggregationPipeline, SortOrder};
use crate::time::Granularity;
use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_QUANTILE_BAND: (f64, f64) = (0.1, 0.9);
pub const DEFAULT_DELTA: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSettings {
    pub quantile_band: (f64, f64),
    pub delta: usize,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            quantile_band: DEFAULT_QUANTILE_BAND,
            delta: DEFAULT_DELTA,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min_rate: f64,
    pub max_rate: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AbnormalityRow {
    pub timestamp: DateTime<Utc>,
    pub hour: u32,
    pub value: Option<f64>,
    pub rate: Option<f64>,
    pub min_rate: Option<f64>,
    pub max_rate: Option<f64>,
    pub is_abnormal: bool,
}

/// `value[t] - value[t - delta]`, forward-filled over positions without a reference.
pub fn rates(series: &[SeriesPoint], delta: usize) -> Vec<Option<f64>> {
    let mut out: Vec<Option<f64>> = series
        .iter()
        .enumerate()
        .map(|(idx, point)| {
            let prior = idx.checked_sub(delta).map(|prev| series[prev].value)?;
            Some(point.value? - prior?)
        })
        .collect();
    forward_fill(&mut out);
    out
}

fn local_hour(ts: DateTime<Utc>, tz: &Tz) -> u32 {
    ts.with_timezone(tz).hour()
}

/// Per-hour `[q_low, q_high]` bands of the training rates; hours without data stay `None`.
pub fn hourly_envelopes(
    train: &[SeriesPoint],
    tz: &Tz,
    settings: DetectorSettings,
) -> [Option<Envelope>; 24] {
    let mut by_hour: [Vec<f64>; 24] = std::array::from_fn(|_| Vec::new());
    for (point, rate) in train.iter().zip(rates(train, settings.delta)) {
        if let Some(rate) = rate {
            by_hour[local_hour(point.timestamp, tz) as usize].push(rate);
        }
    }
    let (low, high) = settings.quantile_band;
    std::array::from_fn(|hour| {
        let rates = &by_hour[hour];
        Some(Envelope {
            min_rate: quantile(rates, low)?,
            max_rate: quantile(rates, high)?,
        })
    })
}

pub fn detect(
    train: &[SeriesPoint],
    test: &[SeriesPoint],
    tz: &Tz,
    settings: DetectorSettings,
) -> Vec<AbnormalityRow> {
    if test.is_empty() {
        return Vec::new();
    }

    let envelopes = hourly_envelopes(train, tz, settings);
    test.iter()
        .zip(rates(test, settings.delta))
        .map(|(point, rate)| {
            let hour = local_hour(point.timestamp, tz);
            let envelope = envelopes[hour as usize];
            let is_abnormal = match (rate, envelope) {
                (Some(rate), Some(env)) => rate < env.min_rate || rate > env.max_rate,
                _ => false,
            };
            AbnormalityRow {
                timestamp: point.timestamp,
                hour,
                value: point.value,
                rate,
                min_rate: envelope.map(|env| env.min_rate),
                max_rate: envelope.map(|env| env.max_rate),
                is_abnormal,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisQuery {
    pub site: String,
    pub field: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub granularity: Granularity,
}

/// Cleans one bucketed series the way the detector expects: gaps filled, dropouts replaced,
/// then smoothed.
pub fn clean_series(frame: &Frame, field: &str) -> Vec<SeriesPoint> {
    let columns = [field.to_string()];
    let cleaned = preprocess::replace_nulls(frame, &columns);
    let cleaned =
        preprocess::replace_with_near(&cleaned, &columns, preprocess::DEFAULT_NEAR_THRESHOLD);
    let cleaned = preprocess::smooth_data(&cleaned, &columns);
    let values = cleaned.column(field).unwrap_or(&[]);
    cleaned
        .index()
        .iter()
        .zip(values)
        .map(|(timestamp, value)| SeriesPoint {
            timestamp: *timestamp,
            value: *value,
        })
        .collect()
}

/// Builds the train window `(start - train_days, start]` and the test window `(start, end]`
/// for `query.field`, then runs [`detect`].
pub async fn detect_for_site(
    aggregator: &TimeBucketAggregator,
    query: &AnalysisQuery,
    train_days: u32,
    tz: &Tz,
    settings: DetectorSettings,
    cancel: &CancellationToken,
) -> DashboardResult<Vec<AbnormalityRow>> {
    aggregator.ensure_site(&query.site).await?;

    let fields = vec![query.field.clone()];
    let window = |after: DateTime<Utc>, until: DateTime<Utc>| AggregationPipeline {
        site: query.site.clone(),
        after,
        until,
        granularity: query.granularity,
        fields: fields.clone(),
        func: AggregateFn::Avg,
        order: SortOrder::Ascending,
        limit: None,
    };

    let test_points = aggregator
        .query(&window(query.start, query.end), cancel)
        .await?;
    if test_points.is_empty() {
        return Ok(Vec::new());
    }
    let train_start = query.start - Duration::days(i64::from(train_days));
    let train_points = aggregator
        .query(&window(train_start, query.start), cancel)
        .await?;

    let train = clean_series(&Frame::from_points(&train_points, &fields), &query.field);
    let test = clean_series(&Frame::from_points(&test_points, &fields), &query.field);
    let rows = detect(&train, &test, tz, settings);
    tracing::debug!(
        site = %query.site,
        field = %query.field,
        train = train.len(),
        test = test.len(),
        abnormal = rows.iter().filter(|row| row.is_abnormal).count(),
        "abnormality detection finished"
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::utc;

    fn hourly_series(days: i64, f: impl Fn(i64) -> f64) -> Vec<SeriesPoint> {
        let t0 = utc(2017, 1, 1, 0, 0);
        (0..days * 24)
            .map(|i| SeriesPoint {
                timestamp: t0 + Duration::hours(i),
                value: Some(f(i)),
            })
            .collect()
    }

    fn diurnal(i: i64) -> f64 {
        let hour = (i % 24) as f64;
        let day = (i / 24) as f64;
        20.0 + 5.0 * (hour / 24.0 * std::f64::consts::TAU).sin() + 0.3 * ((day * 7.0 + hour) % 5.0)
    }

    #[test]
    fn empty_test_series_returns_empty() {
        let train = hourly_series(3, diurnal);
        assert!(detect(&train, &[], &Tz::UTC, DetectorSettings::default()).is_empty());
    }

    #[test]
    fn identical_train_and_test_is_mostly_normal() {
        let series = hourly_series(20, diurnal);
        let rows = detect(&series, &series, &Tz::UTC, DetectorSettings::default());
        assert_eq!(rows.len(), series.len());
        let abnormal = rows.iter().filter(|row| row.is_abnormal).count();
        // the band is 10%..90%, so at most ~20% of rates sit strictly outside it
        assert!(abnormal * 4 <= rows.len(), "{abnormal} of {}", rows.len());
        assert!(rows.iter().skip(DEFAULT_DELTA).all(|row| row.rate.is_some()));
    }

    #[test]
    fn abrupt_jump_is_flagged() {
        let train = hourly_series(14, |i| 20.0 + (i % 3) as f64 * 0.1);
        let mut test = hourly_series(2, |i| 20.0 + (i % 3) as f64 * 0.1);
        for point in test.iter_mut().skip(30) {
            point.value = point.value.map(|v| v + 15.0);
        }
        let rows = detect(&train, &test, &Tz::UTC, DetectorSettings::default());
        assert!(rows[30].is_abnormal);
        assert!(!rows[20].is_abnormal);
        assert!(rows[30].rate.unwrap() > rows[30].max_rate.unwrap());
    }

    #[test]
    fn rates_forward_fill_gaps_and_leave_leading_positions_empty() {
        let mut series = hourly_series(1, |i| i as f64);
        series[5].value = None;
        let rates = rates(&series, 2);
        assert_eq!(rates[0], None);
        assert_eq!(rates[1], None);
        assert_eq!(rates[2], Some(2.0));
        // positions touching the gap carry the previous rate forward
        assert_eq!(rates[5], Some(2.0));
        assert_eq!(rates[7], Some(2.0));
        assert_eq!(rates[8], Some(2.0));
    }

    #[test]
    fn hours_follow_site_timezone() {
        let series = hourly_series(1, |i| i as f64);
        let tz: Tz = "Asia/Singapore".parse().unwrap();
        let rows = detect(&series, &series, &tz, DetectorSettings::default());
        assert_eq!(rows[0].hour, 8);
        assert_eq!(rows[16].hour, 0);
    }

    #[test]
    fn hours_without_training_data_are_never_abnormal() {
        let train = hourly_series(1, |_| 1.0)
            .into_iter()
            .filter(|p| p.timestamp.hour() < 12)
            .collect::<Vec<_>>();
        let test = hourly_series(1, |i| (i * i) as f64);
        let rows = detect(&train, &test, &Tz::UTC, DetectorSettings::default());
        let late = &rows[23];
        assert_eq!(late.min_rate, None);
        assert!(!late.is_abnormal);
    }
}
