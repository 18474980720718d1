//! Health check endpoint

use axum::{Json, extract::State, http::StatusCode};

use crate::api::{state::ApiState, types::HealthResponse};

/// GET /api/v1/health
///
/// Reports whether the storage backend answers. Never requires an API key.
pub async fn health_check(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, storage) = match state.query.health().await {
        Ok(health) if health.healthy => (StatusCode::OK, health.message),
        Ok(health) => (StatusCode::SERVICE_UNAVAILABLE, health.message),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    };

    let body = HealthResponse {
        status: if status.is_success() { "ok" } else { "degraded" }.to_string(),
        storage,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (status, Json(body))
}
