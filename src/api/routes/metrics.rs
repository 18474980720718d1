//! Snapshot ingestion endpoint

use axum::{Json, body::Bytes, extract::State};

use crate::api::{error::ApiResult, state::ApiState};
use crate::ingest::IngestResult;

/// POST /api/v1/metrics
///
/// Accepts one probe snapshot. The raw body is decoded by the ingestion
/// service so that malformed JSON surfaces as a validation error (400).
pub async fn ingest_metrics(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<Json<IngestResult>> {
    let result = state.ingest.ingest_json(&body).await?;
    Ok(Json(result))
}
