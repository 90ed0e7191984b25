use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::services::get_metrics;
use crate::startup::AppState;

/// Liveness probe.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": state.config.service_name,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness probe: the store must answer a ping.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.store().health_check().await {
        Ok(_) => {
            tracing::debug!("Readiness check passed");
            (StatusCode::OK, Json(json!({ "status": "ready" })))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed - store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}

/// Prometheus scrape endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
