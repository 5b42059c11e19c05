use crate::config::{DashboardConfig, DEFAULT_TRAIN_DAYS, MAX_PAGE_LIMIT};
use crate::services::forecast::{ForecastRegistry, ModelCache};
use crate::services::store::{InMemoryLogStore, LogRecord};
use crate::state::AppState;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .expect("valid test timestamp")
}

/// One `insead` record per minute of 2017-01-01 with `cwshdr` ramping from 0 towards 24.
pub fn minute_ramp_store() -> InMemoryLogStore {
    let t0 = utc(2017, 1, 1, 0, 0);
    let records = (0..24 * 60)
        .map(|minute| {
            LogRecord::new("insead", t0 + Duration::minutes(minute))
                .with_field("cwshdr", minute as f64 / 60.0)
        })
        .collect();
    InMemoryLogStore::new(["insead"], records)
}

pub fn test_config() -> DashboardConfig {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let data_root = tempdir.keep();

    DashboardConfig {
        database_url: "postgresql://postgres@localhost/postgres".to_string(),
        forecast_models_path: data_root.join("models/forecast_models.json"),
        data_root,
        site_timezone: chrono_tz::UTC,
        max_page_limit: MAX_PAGE_LIMIT,
        abnormality_train_days: DEFAULT_TRAIN_DAYS,
        abnormality_delta: 10,
        abnormality_quantile_band: (0.1, 0.9),
        current_time: Some(utc(2017, 1, 3, 9, 30)),
    }
}

pub fn test_state() -> AppState {
    AppState::new(
        test_config(),
        Arc::new(minute_ramp_store()),
        ForecastRegistry::default(),
        ModelCache::lstm(),
        CancellationToken::new(),
    )
}
