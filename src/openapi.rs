use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(title = "Chiller dashboard API"),
    paths(
        crate::routes::health::healthz_handler,
        crate::routes::logs::logs_api,
        crate::routes::abnormalities::abnormalities_api,
        crate::routes::forecast::forecast_api
    ),
    components(schemas(
        crate::routes::health::HealthResponse,
        crate::routes::logs::LogsResponse,
        crate::routes::logs::LogsQueryParams,
        crate::routes::abnormalities::AbnormalityResponse,
        crate::routes::abnormalities::AnalysisQueryParams,
        crate::routes::forecast::ForecastResponse,
        crate::services::store::BucketedPoint,
        crate::services::store::AggregateFn,
        crate::services::abnormality::AbnormalityRow,
        crate::services::forecast::ForecastRow,
        crate::services::forecast::ForecastModelSpec,
        crate::time::Granularity,
        crate::error::ErrorBody,
        crate::error::FieldError
    )),
    tags(
        (name = "logs", description = "Time-bucketed sensor logs"),
        (name = "analytics", description = "Abnormality detection and forecasts")
    )
)]
pub struct ApiDoc;

pub fn openapi_json() -> serde_json::Value {
    serde_json::to_value(ApiDoc::openapi()).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to serialize OpenAPI document");
        serde_json::Value::Null
    })
}

async fn openapi_handler() -> Json<serde_json::Value> {
    Json(openapi_json())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_endpoint() {
        let doc = openapi_json();
        let paths = doc["paths"].as_object().unwrap();
        for path in [
            "/healthz",
            "/api/log/{site}",
            "/api/v1/abnormalities/{site}",
            "/api/v1/forecast/{site}",
        ] {
            assert!(paths.contains_key(path), "missing {path}");
        }
        assert!(doc["components"]["schemas"]["LogsResponse"].is_object());
    }
}
