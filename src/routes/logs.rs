use axum::extract::{Path, RawQuery, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};

use crate::error::{DashboardError, ErrorBody};
use crate::routes::params::{parse_logs_query, QueryParams};
use crate::services::logs::{fetch_log_page, LogsQuery};
use crate::services::pagination;
use crate::services::store::{AggregateFn, BucketedPoint};
use crate::state::AppState;
use crate::time::Granularity;

pub const API_VERSION: &str = "1.0";

/// The validated request, echoed back with defaults filled in.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogsQueryParams {
    pub site: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub freq: Granularity,
    pub fields: Vec<String>,
    pub order: i64,
    pub func: AggregateFn,
    pub token: Option<String>,
    pub limit: usize,
}

impl From<&LogsQuery> for LogsQueryParams {
    fn from(query: &LogsQuery) -> Self {
        Self {
            site: query.site.clone(),
            start: query.start,
            end: query.end,
            freq: query.granularity,
            fields: query.fields.clone(),
            order: query.order.sign(),
            func: query.func,
            token: query.token.map(pagination::encode),
            limit: query.limit,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogsResponse {
    pub results: Vec<BucketedPoint>,
    pub query_params: LogsQueryParams,
    pub api_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/log/{site}",
    tag = "logs",
    params(
        ("site" = String, Path, description = "Site identifier"),
        ("start" = Option<String>, Query, description = "Exclusive lower bound (YYYY-MM-DD, YYYY-MM-DDTHH:MM:SS[.ffffff] or RFC3339). Defaults to end minus two days."),
        ("end" = Option<String>, Query, description = "Inclusive upper bound. Defaults to today's midnight (UTC)."),
        ("freq" = Option<String>, Query, description = "Bucket width: years, months, days, hours (default) or minutes"),
        ("fields" = Option<String>, Query, description = "Comma-separated field names"),
        ("order" = Option<i64>, Query, description = "1 for ascending (default), -1 for descending"),
        ("func" = Option<String>, Query, description = "avg (default), sum, max or min"),
        ("token" = Option<String>, Query, description = "nextPageToken from a previous page; supersedes start (ascending) or end (descending)"),
        ("limit" = Option<i64>, Query, description = "Rows per page, 1..=200 (alias: count)")
    ),
    responses(
        (status = 200, description = "Bucketed log values", body = LogsResponse),
        (status = 400, description = "Invalid query parameters", body = ErrorBody),
        (status = 404, description = "Unknown site", body = ErrorBody)
    )
)]
pub(crate) async fn logs_api(
    State(state): State<AppState>,
    Path(site): Path<String>,
    RawQuery(raw): RawQuery,
) -> Result<Json<LogsResponse>, DashboardError> {
    let params = QueryParams::parse(raw.as_deref());
    let query = parse_logs_query(
        &site,
        &params,
        state.config.now(),
        state.config.max_page_limit,
    )
    .map_err(DashboardError::InvalidParameters)?;

    let cancel = state.shutdown.child_token();
    let page = fetch_log_page(&state.aggregator, &query, &cancel).await?;
    Ok(Json(LogsResponse {
        results: page.results,
        query_params: LogsQueryParams::from(&query),
        api_version: API_VERSION.to_string(),
        next_page_token: page.next_page_token,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/log/{site}", get(logs_api))
}
