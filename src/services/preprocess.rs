//! Cleaning stages applied to bucketed series before analysis.
//!
//! Every stage takes a `&Frame` and returns a new one; the input is never modified. An empty
//! column selection means "all columns".

use crate::services::stats::{forward_fill, rolling_mean};
use crate::services::store::BucketedPoint;
use chrono::{DateTime, Utc};

pub const NULL_FILL_WINDOW: usize = 5;
pub const SMOOTHING_WINDOW: usize = 10;
pub const DEFAULT_NEAR_THRESHOLD: f64 = 0.1;
pub const DEFAULT_FEATURE_RANGE: (f64, f64) = (0.1, 1.0);
/// Columns carrying this suffix hold 0/1 indicators and are never treated as noisy readings.
pub const BINARY_SUFFIX: &str = "_bin";

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// A time-indexed table of optional floats, one row per bucket.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    index: Vec<DateTime<Utc>>,
    columns: Vec<Column>,
}

impl Frame {
    pub fn new(index: Vec<DateTime<Utc>>) -> Self {
        Self {
            index,
            columns: Vec::new(),
        }
    }

    /// Appends (or replaces) a column, padding or truncating it to the index length.
    pub fn with_column(mut self, name: impl Into<String>, mut values: Vec<Option<f64>>) -> Self {
        values.resize(self.index.len(), None);
        let name = name.into();
        match self.columns.iter_mut().find(|column| column.name == name) {
            Some(column) => column.values = values,
            None => self.columns.push(Column { name, values }),
        }
        self
    }

    pub fn from_points(points: &[BucketedPoint], fields: &[String]) -> Self {
        let index = points.iter().map(|point| point.bucket_start).collect();
        fields.iter().fold(Self::new(index), |frame, field| {
            let values = points.iter().map(|point| point.value(field)).collect();
            frame.with_column(field.as_str(), values)
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| column.values.as_slice())
    }

    fn selected(&self, names: &[String]) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, column)| names.is_empty() || names.contains(&column.name))
            .map(|(idx, _)| idx)
            .collect()
    }

    fn map_columns<F>(&self, names: &[String], mut f: F) -> Self
    where
        F: FnMut(&Column) -> Option<Vec<Option<f64>>>,
    {
        let mut out = self.clone();
        for idx in self.selected(names) {
            if let Some(values) = f(&self.columns[idx]) {
                out.columns[idx].values = values;
            }
        }
        out
    }
}

/// Fills gaps with the trailing rolling mean over [`NULL_FILL_WINDOW`] rows, then carries the
/// last valid value forward into whatever is still missing.
pub fn replace_nulls(frame: &Frame, columns: &[String]) -> Frame {
    frame.map_columns(columns, |column| {
        let means = rolling_mean(&column.values, NULL_FILL_WINDOW);
        let mut values: Vec<Option<f64>> = column
            .values
            .iter()
            .zip(means)
            .map(|(value, mean)| value.or(mean))
            .collect();
        forward_fill(&mut values);
        Some(values)
    })
}

/// Treats readings below `thresh` as sensor dropouts and replaces them with the nearest
/// preceding valid reading. Binary indicator columns are left untouched.
pub fn replace_with_near(frame: &Frame, columns: &[String], thresh: f64) -> Frame {
    frame.map_columns(columns, |column| {
        if column.name.ends_with(BINARY_SUFFIX) {
            return None;
        }
        let mut values: Vec<Option<f64>> = column
            .values
            .iter()
            .map(|value| value.filter(|v| *v >= thresh))
            .collect();
        forward_fill(&mut values);
        Some(values)
    })
}

/// Causal moving average over [`SMOOTHING_WINDOW`] rows; keeps the series length.
pub fn smooth_data(frame: &Frame, columns: &[String]) -> Frame {
    frame.map_columns(columns, |column| {
        Some(rolling_mean(&column.values, SMOOTHING_WINDOW))
    })
}

/// Adds a `<name>_bin` indicator column (1.0 when the reading is below `thresh`) for each
/// selected column, e.g. to mark cooling-tower shutdowns.
pub fn flag_below_threshold(frame: &Frame, columns: &[String], thresh: f64) -> Frame {
    frame
        .selected(columns)
        .into_iter()
        .map(|idx| &frame.columns[idx])
        .filter(|column| !column.name.ends_with(BINARY_SUFFIX))
        .fold(frame.clone(), |out, column| {
            let flags = column
                .values
                .iter()
                .map(|value| Some(if value.is_some_and(|v| v < thresh) { 1.0 } else { 0.0 }))
                .collect();
            out.with_column(format!("{}{BINARY_SUFFIX}", column.name), flags)
        })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleParams {
    pub scale: f64,
    pub min: f64,
}

/// Per-column min-max scaling fitted on one frame: `y = x * scale + min`.
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxScaler {
    feature_range: (f64, f64),
    params: Vec<(String, ScaleParams)>,
}

impl MinMaxScaler {
    pub fn fit(frame: &Frame, columns: &[String], feature_range: (f64, f64)) -> Self {
        let (lo, hi) = feature_range;
        let params = frame
            .selected(columns)
            .into_iter()
            .map(|idx| {
                let column = &frame.columns[idx];
                let present = column.values.iter().flatten().copied();
                let bounds = present.fold(None, |acc: Option<(f64, f64)>, v| match acc {
                    None => Some((v, v)),
                    Some((min, max)) => Some((min.min(v), max.max(v))),
                });
                let params = match bounds {
                    Some((data_min, data_max)) => {
                        let range = data_max - data_min;
                        // constant columns map to the lower bound of the target range
                        let range = if range == 0.0 { 1.0 } else { range };
                        let scale = (hi - lo) / range;
                        ScaleParams {
                            scale,
                            min: lo - data_min * scale,
                        }
                    }
                    None => ScaleParams { scale: 1.0, min: 0.0 },
                };
                (column.name.clone(), params)
            })
            .collect();
        Self {
            feature_range,
            params,
        }
    }

    pub fn feature_range(&self) -> (f64, f64) {
        self.feature_range
    }

    pub fn params(&self, column: &str) -> Option<ScaleParams> {
        self.params
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, params)| *params)
    }

    pub fn transform(&self, column: &str, value: f64) -> Option<f64> {
        self.params(column)
            .map(|params| value * params.scale + params.min)
    }

    /// `(y - min) / scale`, the exact inverse of [`MinMaxScaler::transform`].
    pub fn inverse(&self, column: &str, value: f64) -> Option<f64> {
        self.params(column)
            .map(|params| (value - params.min) / params.scale)
    }

    fn apply(&self, frame: &Frame) -> Frame {
        let names: Vec<String> = self.params.iter().map(|(name, _)| name.clone()).collect();
        let mut out = Frame::new(frame.index.clone());
        for column in frame.columns.iter().filter(|c| names.contains(&c.name)) {
            let values = column
                .values
                .iter()
                .map(|value| value.and_then(|v| self.transform(&column.name, v)))
                .collect();
            out = out.with_column(column.name.as_str(), values);
        }
        out
    }
}

/// Fits a [`MinMaxScaler`] on the selected columns and returns only those columns, scaled,
/// together with the fitted scaler.
pub fn normalize(
    frame: &Frame,
    columns: &[String],
    feature_range: (f64, f64),
) -> (Frame, MinMaxScaler) {
    let scaler = MinMaxScaler::fit(frame, columns, feature_range);
    (scaler.apply(frame), scaler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn frame(name: &str, values: Vec<Option<f64>>) -> Frame {
        let t0 = Utc.with_ymd_and_hms(2017, 1, 1, 0, 0, 0).unwrap();
        let index = (0..values.len())
            .map(|i| t0 + Duration::hours(i as i64))
            .collect();
        Frame::new(index).with_column(name, values)
    }

    fn all() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn replace_nulls_fills_gap_between_neighbours() {
        let input = frame("cwshdr", vec![Some(4.0), None, Some(6.0)]);
        let out = replace_nulls(&input, &all());
        let filled = out.column("cwshdr").unwrap()[1].unwrap();
        assert!((4.0..=6.0).contains(&filled));
        // input untouched
        assert_eq!(input.column("cwshdr").unwrap()[1], None);
    }

    #[test]
    fn replace_nulls_uses_trailing_window_of_five() {
        let values = vec![Some(10.0), Some(1.0), Some(2.0), Some(3.0), Some(4.0), None];
        let out = replace_nulls(&frame("x", values), &all());
        // window covers rows 1..=5: mean(1, 2, 3, 4)
        assert_eq!(out.column("x").unwrap()[5], Some(2.5));
    }

    #[test]
    fn replace_nulls_leaves_all_missing_column_missing() {
        let out = replace_nulls(&frame("x", vec![None, None, None]), &all());
        assert_eq!(out.column("x").unwrap(), &[None, None, None]);
    }

    #[test]
    fn replace_with_near_forward_fills_low_readings() {
        let values = vec![Some(0.05), Some(3.0), Some(0.0), Some(-1.0), Some(4.0)];
        let input = frame("ctkw", values.clone()).with_column("ctkw_bin", values);
        let out = replace_with_near(&input, &all(), DEFAULT_NEAR_THRESHOLD);
        assert_eq!(
            out.column("ctkw").unwrap(),
            &[None, Some(3.0), Some(3.0), Some(3.0), Some(4.0)]
        );
        assert_eq!(out.column("ctkw_bin"), input.column("ctkw_bin"));
    }

    #[test]
    fn replace_with_near_respects_column_selection() {
        let input =
            frame("a", vec![Some(1.0), Some(0.0)]).with_column("b", vec![Some(1.0), Some(0.0)]);
        let out = replace_with_near(&input, &["a".to_string()], 0.1);
        assert_eq!(out.column("a").unwrap(), &[Some(1.0), Some(1.0)]);
        assert_eq!(out.column("b").unwrap(), &[Some(1.0), Some(0.0)]);
    }

    #[test]
    fn smoothing_keeps_length_and_averages_causally() {
        let values: Vec<Option<f64>> = (1..=12).map(|v| Some(v as f64)).collect();
        let out = smooth_data(&frame("x", values), &all());
        let smoothed = out.column("x").unwrap();
        assert_eq!(smoothed.len(), 12);
        assert_eq!(smoothed[0], Some(1.0));
        assert_eq!(smoothed[1], Some(1.5));
        // rows 2..=11 → mean(3..=12)
        assert_eq!(smoothed[11], Some(7.5));
    }

    #[test]
    fn flags_low_readings_in_binary_columns() {
        let input = frame("ctkw", vec![Some(0.0), Some(5.0), None]);
        let out = flag_below_threshold(&input, &all(), 0.1);
        assert_eq!(
            out.column("ctkw_bin").unwrap(),
            &[Some(1.0), Some(0.0), Some(0.0)]
        );
        assert_eq!(out.column("ctkw"), input.column("ctkw"));
    }

    #[test]
    fn normalize_maps_into_range_and_inverts_exactly() {
        let input = frame("x", vec![Some(10.0), Some(20.0), None, Some(30.0)])
            .with_column("y", vec![Some(1.0); 4]);
        let (out, scaler) = normalize(&input, &["x".to_string()], DEFAULT_FEATURE_RANGE);
        assert!(out.column("y").is_none());
        let scaled = out.column("x").unwrap();
        assert!((scaled[0].unwrap() - 0.1).abs() < 1e-12);
        assert!((scaled[1].unwrap() - 0.55).abs() < 1e-12);
        assert_eq!(scaled[2], None);
        assert!((scaled[3].unwrap() - 1.0).abs() < 1e-12);
        for (raw, y) in [(10.0, scaled[0]), (20.0, scaled[1]), (30.0, scaled[3])] {
            assert!((scaler.inverse("x", y.unwrap()).unwrap() - raw).abs() < 1e-9);
        }
    }

    #[test]
    fn normalize_constant_column_round_trips() {
        let input = frame("cwshdr", vec![Some(42.0); 5]);
        let (out, scaler) = normalize(&input, &all(), DEFAULT_FEATURE_RANGE);
        for value in out.column("cwshdr").unwrap() {
            let value = value.unwrap();
            assert!((value - 0.1).abs() < 1e-12);
            assert!((scaler.inverse("cwshdr", value).unwrap() - 42.0).abs() < 1e-9);
        }
    }

    #[test]
    fn builds_frame_from_bucketed_points() {
        let t0 = Utc.with_ymd_and_hms(2017, 1, 1, 0, 0, 0).unwrap();
        let points = vec![
            BucketedPoint {
                bucket_start: t0,
                values: [("a".to_string(), Some(1.0))].into_iter().collect(),
            },
            BucketedPoint {
                bucket_start: t0 + Duration::hours(1),
                values: [("a".to_string(), None)].into_iter().collect(),
            },
        ];
        let frame = Frame::from_points(&points, &["a".to_string(), "b".to_string()]);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.column("a").unwrap(), &[Some(1.0), None]);
        assert_eq!(frame.column("b").unwrap(), &[None, None]);
    }
}
