//! Server endpoints

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{Duration, Utc};

use super::decode;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{
        DEFAULT_SAMPLE_LIMIT, MAX_SAMPLE_LIMIT, MetricQuery, MetricsResponse, ServerListQuery,
        ServersResponse,
    },
};
use crate::storage::backend::{QueryRange, ServerFilter};
use crate::storage::schema::{AgentConfig, MetricType, Server, ServerUpdate};

fn server_not_found(server_id: &str) -> ApiError {
    ApiError::NotFound(format!("server `{server_id}` not found"))
}

/// GET /api/v1/servers
///
/// List registered servers, optionally filtered by status or hostname
pub async fn list_servers(
    State(state): State<ApiState>,
    Query(query): Query<ServerListQuery>,
) -> ApiResult<Json<ServersResponse>> {
    let filter = ServerFilter {
        status: query.status.as_deref().map(str::parse).transpose()?,
        hostname: query.hostname.clone(),
    };
    let page = query.page();

    let servers = state.query.list_servers(&filter, page).await?;

    Ok(Json(ServersResponse {
        count: servers.len(),
        servers,
        page: page.page,
        per_page: page.per_page,
    }))
}

/// GET /api/v1/servers/:id
pub async fn get_server(
    State(state): State<ApiState>,
    Path(server_id): Path<String>,
) -> ApiResult<Json<Server>> {
    state
        .query
        .get_server(&server_id)
        .await?
        .map(Json)
        .ok_or_else(|| server_not_found(&server_id))
}

/// PUT /api/v1/servers/:id
///
/// Edits admin fields (hostname, status, timezone, country, region, city).
/// An empty string clears an optional field.
pub async fn update_server(
    State(state): State<ApiState>,
    Path(server_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Server>> {
    let update: ServerUpdate = decode(&body)?;

    state
        .query
        .update_server(&server_id, &update)
        .await?
        .map(Json)
        .ok_or_else(|| server_not_found(&server_id))
}

/// DELETE /api/v1/servers/:id
pub async fn delete_server(
    State(state): State<ApiState>,
    Path(server_id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.query.delete_server(&server_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(server_not_found(&server_id))
    }
}

/// GET /api/v1/servers/:id/agent-config
pub async fn get_agent_config(
    State(state): State<ApiState>,
    Path(server_id): Path<String>,
) -> ApiResult<Json<AgentConfig>> {
    state
        .query
        .get_agent_config(&server_id)
        .await?
        .map(Json)
        .ok_or_else(|| server_not_found(&server_id))
}

/// PUT /api/v1/servers/:id/agent-config
pub async fn set_agent_config(
    State(state): State<ApiState>,
    Path(server_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<AgentConfig>> {
    let config: AgentConfig = decode(&body)?;

    state
        .query
        .set_agent_config(&server_id, &config)
        .await?
        .map(Json)
        .ok_or_else(|| server_not_found(&server_id))
}

/// GET /api/v1/servers/:id/metrics/:metric_type
///
/// Samples of one metric family within a time range (default: the last hour)
pub async fn get_server_metrics(
    State(state): State<ApiState>,
    Path((server_id, metric_type)): Path<(String, String)>,
    Query(query): Query<MetricQuery>,
) -> ApiResult<Json<MetricsResponse>> {
    let metric_type: MetricType = metric_type.parse()?;

    let end = query.end.unwrap_or_else(Utc::now);
    let start = query.start.unwrap_or_else(|| end - Duration::hours(1));
    if start > end {
        return Err(ApiError::InvalidRequest(
            "`start` must not be after `end`".to_string(),
        ));
    }

    let range = QueryRange {
        start,
        end,
        limit: Some(query.limit.unwrap_or(DEFAULT_SAMPLE_LIMIT).min(MAX_SAMPLE_LIMIT)),
    };

    let series = state
        .query
        .get_server_metrics(&server_id, metric_type, &range)
        .await?
        .ok_or_else(|| server_not_found(&server_id))?;

    Ok(Json(MetricsResponse {
        server_id,
        start,
        end,
        count: series.len(),
        series,
    }))
}
