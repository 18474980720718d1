//! Alert history endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{AlertListQuery, AlertsResponse},
};
use crate::storage::backend::AlertFilter;
use crate::storage::schema::{Alert, AlertId};

/// GET /api/v1/alerts
///
/// Alerts newest first, filtered by status, server and metric type
pub async fn list_alerts(
    State(state): State<ApiState>,
    Query(query): Query<AlertListQuery>,
) -> ApiResult<Json<AlertsResponse>> {
    let page = query.page();

    let server_id = match &query.server {
        Some(server_id) => match state.query.get_server(server_id).await? {
            Some(server) => Some(server.id),
            // Unknown server has no alerts
            None => {
                return Ok(Json(AlertsResponse {
                    alerts: vec![],
                    count: 0,
                    page: page.page,
                    per_page: page.per_page,
                }));
            }
        },
        None => None,
    };

    let filter = AlertFilter {
        status: query.status.as_deref().map(str::parse).transpose()?,
        server_id,
        metric_type: query.metric_type.as_deref().map(str::parse).transpose()?,
    };

    let alerts = state.query.list_alerts(&filter, page).await?;

    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
        page: page.page,
        per_page: page.per_page,
    }))
}

/// GET /api/v1/alerts/:id
pub async fn get_alert(
    State(state): State<ApiState>,
    Path(id): Path<AlertId>,
) -> ApiResult<Json<Alert>> {
    state
        .query
        .get_alert(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("alert {id} not found")))
}

/// PUT /api/v1/alerts/:id/resolve
///
/// Resolves an active alert now. Resolving a resolved alert returns it as is.
pub async fn resolve_alert(
    State(state): State<ApiState>,
    Path(id): Path<AlertId>,
) -> ApiResult<Json<Alert>> {
    state
        .query
        .resolve_alert(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("alert {id} not found")))
}
