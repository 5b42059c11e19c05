pub mod abnormalities;
pub mod forecast;
pub mod health;
pub mod logs;
pub mod params;

use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(logs::router())
                .merge(abnormalities::router())
                .merge(forecast::router())
                .merge(crate::openapi::router()),
        )
        .with_state(state)
}
