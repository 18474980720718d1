pub mod alerts;
pub mod health;
pub mod metrics;
pub mod rules;
pub mod servers;
pub mod stats;

use serde::de::DeserializeOwned;

use crate::api::error::{ApiError, ApiResult};

/// Decode a JSON body, reporting serde's message as a bad request
fn decode<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))
}
