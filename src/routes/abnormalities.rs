use axum::extract::{Path, RawQuery, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};

use crate::error::{DashboardError, ErrorBody};
use crate::routes::params::{parse_abnormality_query, QueryParams};
use crate::services::abnormality::{detect_for_site, AbnormalityRow, AnalysisQuery, DetectorSettings};
use crate::state::AppState;
use crate::time::Granularity;

pub const API_VERSION: &str = "v1";

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisQueryParams {
    pub site: String,
    pub field: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub freq: Granularity,
}

impl From<&AnalysisQuery> for AnalysisQueryParams {
    fn from(query: &AnalysisQuery) -> Self {
        Self {
            site: query.site.clone(),
            field: query.field.clone(),
            start: query.start,
            end: query.end,
            freq: query.granularity,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AbnormalityResponse {
    pub results: Vec<AbnormalityRow>,
    pub query_params: AnalysisQueryParams,
    pub api_version: String,
    pub train_days: u32,
}

#[utoipa::path(
    get,
    path = "/api/v1/abnormalities/{site}",
    tag = "analytics",
    params(
        ("site" = String, Path, description = "Site identifier"),
        ("field" = String, Query, description = "Field to analyse"),
        ("start" = Option<String>, Query, description = "Start of the tested window (exclusive); training covers the preceding days"),
        ("end" = Option<String>, Query, description = "End of the tested window (inclusive)"),
        ("freq" = Option<String>, Query, description = "Bucket width (default hours)")
    ),
    responses(
        (status = 200, description = "Per-bucket rate envelopes and flags", body = AbnormalityResponse),
        (status = 400, description = "Invalid query parameters", body = ErrorBody),
        (status = 404, description = "Unknown site", body = ErrorBody)
    )
)]
pub(crate) async fn abnormalities_api(
    State(state): State<AppState>,
    Path(site): Path<String>,
    RawQuery(raw): RawQuery,
) -> Result<Json<AbnormalityResponse>, DashboardError> {
    let params = QueryParams::parse(raw.as_deref());
    let query = parse_abnormality_query(&site, &params, state.config.now())
        .map_err(DashboardError::InvalidParameters)?;
    let settings = DetectorSettings {
        quantile_band: state.config.abnormality_quantile_band,
        delta: state.config.abnormality_delta,
    };

    let cancel = state.shutdown.child_token();
    let results = detect_for_site(
        &state.aggregator,
        &query,
        state.config.abnormality_train_days,
        &state.config.site_timezone,
        settings,
        &cancel,
    )
    .await?;
    Ok(Json(AbnormalityResponse {
        results,
        query_params: AnalysisQueryParams::from(&query),
        api_version: API_VERSION.to_string(),
        train_days: state.config.abnormality_train_days,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/abnormalities/{site}", get(abnormalities_api))
}
