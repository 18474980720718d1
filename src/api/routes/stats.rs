//! System statistics endpoint

use axum::{Json, extract::State};

use crate::api::{error::ApiResult, state::ApiState, types::StatsResponse};

/// GET /api/v1/stats
///
/// Returns storage statistics and, when the maintenance actor runs, its counters
pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<StatsResponse>> {
    let storage = state.query.stats().await?;

    let maintenance = match &state.maintenance {
        Some(handle) => handle.get_stats().await,
        None => None,
    };

    Ok(Json(StatsResponse {
        timestamp: chrono::Utc::now().to_rfc3339(),
        storage,
        maintenance,
    }))
}
