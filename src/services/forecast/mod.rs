//! Short-horizon forecasts of one target field from a sliding window of feature buckets.

pub mod cache;
pub mod model;
pub mod registry;

use crate::error::{DashboardError, DashboardResult};
use crate::services::abnormality::AnalysisQuery;
use crate::services::aggregator::TimeBucketAggregator;
use crate::services::preprocess::{self, Frame, MinMaxScaler};
use crate::services::store::{AggregateFn, AggregationPipeline, SortOrder};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use cache::{ModelCache, ModelLoader};
pub use model::{LstmRegressor, ModelError, SequenceModel};
pub use registry::{ForecastModelSpec, ForecastRegistry};

#[derive(Debug, Clone, PartialEq, serde::Serialize, utoipa::ToSchema)]
pub struct ForecastRow {
    pub timestamp: DateTime<Utc>,
    pub actual: f64,
    pub predicted: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastOutcome {
    pub spec: ForecastModelSpec,
    pub rows: Vec<ForecastRow>,
}

/// One scaled model input and the scaled target it should predict.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub target_row: usize,
    pub input: Vec<f64>,
    pub actual: f64,
}

/// Slides a `lookback`-row window over `frame`.
///
/// Window `i` covers rows `[i, i + lookback)` flattened row by row across `features`; its
/// target is row `i + lookback` of `target`. Windows touching a missing value are dropped,
/// and their count is returned alongside the kept ones.
pub fn build_windows(
    frame: &Frame,
    features: &[String],
    target: &str,
    lookback: usize,
) -> (Vec<Window>, usize) {
    let Some(target_values) = frame.column(target) else {
        return (Vec::new(), 0);
    };
    let feature_values: Option<Vec<&[Option<f64>]>> =
        features.iter().map(|name| frame.column(name)).collect();
    let Some(feature_values) = feature_values else {
        return (Vec::new(), 0);
    };
    if lookback == 0 || frame.len() <= lookback {
        return (Vec::new(), 0);
    }

    let mut windows = Vec::new();
    let mut skipped = 0;
    for start in 0..frame.len() - lookback {
        let target_row = start + lookback;
        let input: Option<Vec<f64>> = (start..target_row)
            .flat_map(|row| feature_values.iter().map(move |column| column[row]))
            .collect();
        match (input, target_values[target_row]) {
            (Some(input), Some(actual)) => windows.push(Window {
                target_row,
                input,
                actual,
            }),
            _ => skipped += 1,
        }
    }
    (windows, skipped)
}

/// Scores every window on its own, batch size one.
pub fn score_windows(
    model: &dyn SequenceModel,
    windows: &[Window],
) -> Result<Vec<f64>, ModelError> {
    windows.iter().map(|window| model.predict(&window.input)).collect()
}

/// Maps scaled actuals and predictions back into physical units.
pub fn assemble_rows(
    frame: &Frame,
    scaler: &MinMaxScaler,
    target: &str,
    windows: &[Window],
    predictions: &[f64],
) -> Vec<ForecastRow> {
    windows
        .iter()
        .zip(predictions)
        .filter_map(|(window, predicted)| {
            Some(ForecastRow {
                timestamp: *frame.index().get(window.target_row)?,
                actual: scaler.inverse(target, window.actual)?,
                predicted: scaler.inverse(target, *predicted)?,
            })
        })
        .collect()
}

/// Forecasts `query.field` over `(start, end]` using its registered model.
///
/// History reaches `lookback` buckets before `start` so the first window is complete. The
/// model lookup happens before any store access, so an unregistered target never reaches
/// inference.
pub async fn forecast_for_site(
    aggregator: &TimeBucketAggregator,
    registry: &ForecastRegistry,
    models: &ModelCache,
    query: &AnalysisQuery,
    cancel: &CancellationToken,
) -> DashboardResult<ForecastOutcome> {
    let spec = registry
        .lookup(&query.field)
        .cloned()
        .ok_or_else(|| DashboardError::ModelNotFound(query.field.clone()))?;
    aggregator.ensure_site(&query.site).await?;

    let lookback = u32::try_from(spec.lookback)
        .map_err(|_| DashboardError::invalid("field", "model lookback is out of range"))?;
    let after = query
        .granularity
        .retreat(query.start, lookback)
        .ok_or_else(|| DashboardError::invalid("start", "start is too early for this model"))?;
    let fields = spec.query_fields();
    let pipeline = AggregationPipeline {
        site: query.site.clone(),
        after,
        until: query.end,
        granularity: query.granularity,
        fields: fields.clone(),
        func: AggregateFn::Avg,
        order: SortOrder::Ascending,
        limit: None,
    };
    let points = aggregator.query(&pipeline, cancel).await?;

    let frame = Frame::from_points(&points, &fields);
    let cleaned = preprocess::replace_nulls(&frame, &fields);
    let cleaned =
        preprocess::replace_with_near(&cleaned, &fields, preprocess::DEFAULT_NEAR_THRESHOLD);
    let (scaled, scaler) = preprocess::normalize(&cleaned, &fields, preprocess::DEFAULT_FEATURE_RANGE);
    let (windows, skipped) = build_windows(&scaled, &spec.features, &spec.target, spec.lookback);
    tracing::debug!(
        site = %query.site,
        target = %spec.target,
        windows = windows.len(),
        skipped,
        "forecast windows built"
    );
    if windows.is_empty() {
        return Ok(ForecastOutcome {
            spec,
            rows: Vec::new(),
        });
    }

    let model = models
        .get(&spec.model_path)
        .await
        .map_err(|err| DashboardError::ModelLoad {
            model_id: spec.model_path.display().to_string(),
            message: err.to_string(),
        })?;
    if model.input_width() != spec.input_width() {
        return Err(DashboardError::Inference(format!(
            "model for {} takes {} inputs but the registry describes {}",
            spec.target,
            model.input_width(),
            spec.input_width()
        )));
    }

    let windows = Arc::new(windows);
    let scoring = tokio::task::spawn_blocking({
        let windows = windows.clone();
        move || score_windows(model.as_ref(), &windows)
    });
    let predictions = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DashboardError::Cancelled),
        joined = scoring => joined
            .map_err(|err| DashboardError::Inference(err.to_string()))?
            .map_err(|err| DashboardError::Inference(err.to_string()))?,
    };

    let rows = assemble_rows(&scaled, &scaler, &spec.target, &windows, &predictions);
    Ok(ForecastOutcome { spec, rows })
}
