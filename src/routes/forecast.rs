use axum::extract::{Path, RawQuery, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::error::{DashboardError, ErrorBody};
use crate::routes::abnormalities::{AnalysisQueryParams, API_VERSION};
use crate::routes::params::{parse_forecast_query, QueryParams};
use crate::services::forecast::{forecast_for_site, ForecastModelSpec, ForecastRow};
use crate::state::AppState;

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ForecastResponse {
    pub results: Vec<ForecastRow>,
    pub query_params: AnalysisQueryParams,
    pub api_version: String,
    pub model: ForecastModelSpec,
}

#[utoipa::path(
    get,
    path = "/api/v1/forecast/{site}",
    tag = "analytics",
    params(
        ("site" = String, Path, description = "Site identifier"),
        ("field" = String, Query, description = "Target field with a registered model"),
        ("start" = Option<String>, Query, description = "Start of the scored window (exclusive)"),
        ("end" = Option<String>, Query, description = "End of the scored window (inclusive)"),
        ("freq" = Option<String>, Query, description = "Bucket width (default hours)")
    ),
    responses(
        (status = 200, description = "Actual and predicted values per bucket", body = ForecastResponse),
        (status = 400, description = "Invalid query parameters", body = ErrorBody),
        (status = 404, description = "Unknown site or no model for the field", body = ErrorBody),
        (status = 500, description = "Model could not be loaded or run", body = ErrorBody)
    )
)]
pub(crate) async fn forecast_api(
    State(state): State<AppState>,
    Path(site): Path<String>,
    RawQuery(raw): RawQuery,
) -> Result<Json<ForecastResponse>, DashboardError> {
    let params = QueryParams::parse(raw.as_deref());
    let query = parse_forecast_query(&site, &params, state.config.now())
        .map_err(DashboardError::InvalidParameters)?;

    let cancel = state.shutdown.child_token();
    let outcome = forecast_for_site(
        &state.aggregator,
        &state.registry,
        &state.models,
        &query,
        &cancel,
    )
    .await?;
    Ok(Json(ForecastResponse {
        results: outcome.rows,
        query_params: AnalysisQueryParams::from(&query),
        api_version: API_VERSION.to_string(),
        model: outcome.spec,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/forecast/{site}", get(forecast_api))
}
