use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/chiller-dashboard/config.json";
const DEFAULT_DATA_ROOT: &str = "/var/lib/chiller-dashboard";

pub const MAX_PAGE_LIMIT: usize = 200;
pub const DEFAULT_TRAIN_DAYS: u32 = 30;
pub const MAX_TRAIN_DAYS: u32 = 365;

pub(crate) fn setup_config_path() -> PathBuf {
    env_optional_path("DASHBOARD_SETUP_CONFIG_PATH")
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETUP_CONFIG_PATH))
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    data_root: Option<String>,
    #[serde(default)]
    forecast_models_path: Option<String>,
    #[serde(default)]
    site_timezone: Option<String>,
    #[serde(default)]
    max_page_limit: Option<usize>,
    #[serde(default)]
    abnormality_train_days: Option<u32>,
}

fn load_setup_config_overrides() -> Option<SetupConfigOverrides> {
    let path = setup_config_path();
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn apply_setup_overrides(config: &mut DashboardConfig, overrides: &SetupConfigOverrides) -> Result<()> {
    if let Some(path) = non_empty(overrides.forecast_models_path.as_deref()) {
        config.forecast_models_path = PathBuf::from(path);
    }
    if let Some(zone) = non_empty(overrides.site_timezone.as_deref()) {
        config.site_timezone = parse_timezone(&zone)?;
    }
    if let Some(limit) = overrides.max_page_limit.filter(|v| *v != 0) {
        config.max_page_limit = limit.min(MAX_PAGE_LIMIT);
    }
    if let Some(days) = overrides.abnormality_train_days.filter(|v| *v != 0) {
        config.abnormality_train_days = days.min(MAX_TRAIN_DAYS);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub database_url: String,
    pub data_root: PathBuf,
    pub forecast_models_path: PathBuf,
    /// Clock used for hour-of-day labels.
    pub site_timezone: Tz,
    pub max_page_limit: usize,
    pub abnormality_train_days: u32,
    pub abnormality_delta: usize,
    pub abnormality_quantile_band: (f64, f64),
    /// Fixed "now" for default date ranges.
    pub current_time: Option<DateTime<Utc>>,
}

impl DashboardConfig {
    pub fn from_env() -> Result<Self> {
        let setup_overrides = load_setup_config_overrides();

        let database_url = env_optional_string("DASHBOARD_DATABASE_URL")
            .or_else(|| {
                setup_overrides
                    .as_ref()
                    .and_then(|ov| non_empty(ov.database_url.as_deref()))
            })
            .context("DASHBOARD_DATABASE_URL must be set (or present as database_url in the setup config)")?;
        let data_root = env_optional_string("DASHBOARD_DATA_ROOT")
            .or_else(|| {
                setup_overrides
                    .as_ref()
                    .and_then(|ov| non_empty(ov.data_root.as_deref()))
            })
            .unwrap_or_else(|| DEFAULT_DATA_ROOT.to_string());
        let data_root = PathBuf::from(data_root);
        let models_default = data_root.join("models/forecast_models.json");
        let forecast_models_path = env_path(
            "DASHBOARD_FORECAST_MODELS_PATH",
            &models_default.to_string_lossy(),
        )?;
        let site_timezone = parse_timezone(&env_string("DASHBOARD_SITE_TIMEZONE", "UTC"))?;
        let max_page_limit = env_usize("DASHBOARD_MAX_PAGE_LIMIT", MAX_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        let abnormality_train_days = env_u32("DASHBOARD_ABNORMALITY_TRAIN_DAYS", DEFAULT_TRAIN_DAYS)
            .clamp(1, MAX_TRAIN_DAYS);
        let abnormality_delta = env_usize("DASHBOARD_ABNORMALITY_DELTA", 10).max(1);
        let abnormality_quantile_band = validate_quantile_band(
            env_f64("DASHBOARD_ABNORMALITY_QUANTILE_LOW", 0.1),
            env_f64("DASHBOARD_ABNORMALITY_QUANTILE_HIGH", 0.9),
        )?;
        let current_time = env_optional_string("DASHBOARD_CURRENT_TIME")
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|ts| ts.with_timezone(&Utc))
                    .with_context(|| format!("DASHBOARD_CURRENT_TIME {raw} is not RFC3339"))
            })
            .transpose()?;

        let mut config = Self {
            database_url,
            data_root,
            forecast_models_path,
            site_timezone,
            max_page_limit,
            abnormality_train_days,
            abnormality_delta,
            abnormality_quantile_band,
            current_time,
        };
        if let Some(overrides) = setup_overrides.as_ref() {
            apply_setup_overrides(&mut config, overrides)?;
        }
        Ok(config)
    }

    /// The reference instant for default date ranges.
    pub fn now(&self) -> DateTime<Utc> {
        self.current_time.unwrap_or_else(Utc::now)
    }
}

fn parse_timezone(raw: &str) -> Result<Tz> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|err| anyhow::anyhow!("unknown site timezone {raw}: {err}"))
}

fn validate_quantile_band(low: f64, high: f64) -> Result<(f64, f64)> {
    if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low >= high {
        anyhow::bail!("abnormality quantile band ({low}, {high}) must satisfy 0 <= low < high <= 1");
    }
    Ok((low, high))
}

fn env_string(key: &str, default: &str) -> String {
    env_optional_string(key).unwrap_or_else(|| default.to_string())
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_optional_path(key: &str) -> Option<PathBuf> {
    env_optional_string(key).map(PathBuf::from)
}

fn env_path(key: &str, default: &str) -> Result<PathBuf> {
    let value = env_optional_string(key).unwrap_or_else(|| default.to_string());
    let path = PathBuf::from(value);
    if path.as_os_str().is_empty() {
        anyhow::bail!("{key} resolved to an empty path");
    }
    Ok(path)
}
