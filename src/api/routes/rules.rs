//! Alert rule administration endpoints

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use super::decode;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::RulesResponse,
};
use crate::storage::schema::{AlertRuleId, NewAlertRule, RuleRecord, RuleUpdate};

/// GET /api/v1/alert-rules
pub async fn list_rules(State(state): State<ApiState>) -> ApiResult<Json<RulesResponse>> {
    let rules = state.query.list_rules().await?;
    Ok(Json(RulesResponse {
        count: rules.len(),
        rules,
    }))
}

/// POST /api/v1/alert-rules
pub async fn create_rule(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<RuleRecord>)> {
    let rule: NewAlertRule = decode(&body)?;
    let record = state.query.create_rule(&rule).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// PATCH|PUT /api/v1/alert-rules/:id
///
/// Changes threshold, comparison, duration or the enabled flag. Omitted
/// fields keep their value. A new condition or disabling the rule discards
/// its breach timers.
pub async fn update_rule(
    State(state): State<ApiState>,
    Path(id): Path<AlertRuleId>,
    body: Bytes,
) -> ApiResult<Json<RuleRecord>> {
    let update: RuleUpdate = decode(&body)?;

    state
        .query
        .update_rule(id, &update)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("alert rule {id} not found")))
}

/// DELETE /api/v1/alert-rules/:id
pub async fn delete_rule(
    State(state): State<ApiState>,
    Path(id): Path<AlertRuleId>,
) -> ApiResult<StatusCode> {
    if state.query.delete_rule(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("alert rule {id} not found")))
    }
}
