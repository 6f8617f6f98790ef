use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;

use crate::AppState;

/// Liveness probe
#[utoipa::path(get, path = "/health", responses((status = 200, description = "service is up")))]
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Readiness probe: verifies the store answers.
#[utoipa::path(get, path = "/readyz", responses((status = 200), (status = 503)))]
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.store.list_apps().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
