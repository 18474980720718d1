//! Bearer API key authentication middleware

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::debug;

/// Authentication middleware
///
/// Accepts a request whose `Authorization: Bearer <key>` matches any of the
/// configured keys.
pub async fn auth_middleware(
    State(api_keys): State<Arc<Vec<String>>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    // Get Authorization header
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    // Check Bearer token format
    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidFormat)?;

    if !api_keys.iter().any(|key| key == token) {
        debug!("rejected request to {} with unknown key", request.uri());
        return Err(AuthError::InvalidToken);
    }

    Ok(next.run(request).await)
}

/// Authentication errors
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidFormat,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing Authorization header"),
            AuthError::InvalidFormat => (
                StatusCode::UNAUTHORIZED,
                "Invalid Authorization format (expected: Bearer <key>)",
            ),
            AuthError::InvalidToken => (StatusCode::FORBIDDEN, "Invalid API key"),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
