//! REST API of the hub
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Services** (`IngestionService`, `QueryService`) shared through `ApiState`
//! - **Bearer API keys** checked on every route except the health check
//!
//! ## Endpoints
//!
//! - `POST /api/v1/metrics` - Ingest a probe snapshot
//! - `GET /api/v1/health` - Health check
//! - `GET /api/v1/stats` - Storage and maintenance statistics
//! - `GET /api/v1/servers` - List servers
//! - `GET|PUT|DELETE /api/v1/servers/{id}` - One server, edit or delete it
//! - `GET|PUT /api/v1/servers/{id}/agent-config` - Collection settings for the server's agent
//! - `GET /api/v1/servers/{id}/metrics/{metric_type}` - Samples in a time range
//! - `GET /api/v1/alerts` - List alerts
//! - `GET /api/v1/alerts/{id}` - One alert
//! - `PUT /api/v1/alerts/{id}/resolve` - Resolve an alert by hand
//! - `GET|POST /api/v1/alert-rules` - List or create rules
//! - `PATCH|PUT|DELETE /api/v1/alert-rules/{id}` - Update or delete a rule

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod middleware;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{get, patch, post, put},
};
use std::net::{Ipv4Addr, SocketAddr};
#[cfg(feature = "api")]
use std::sync::Arc;
#[cfg(feature = "api")]
use tracing::info;

/// API server configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    #[serde(rename = "bind", default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Accepted bearer keys; empty leaves the API open
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Enable CORS for browser clients
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

fn default_enable_cors() -> bool {
    true
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            api_keys: Vec::new(),
            enable_cors: default_enable_cors(),
        }
    }
}

/// Build the application router
#[cfg(feature = "api")]
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let mut app = Router::new()
        .route("/api/v1/metrics", post(routes::metrics::ingest_metrics))
        .route("/api/v1/stats", get(routes::stats::get_stats))
        .route("/api/v1/servers", get(routes::servers::list_servers))
        .route(
            "/api/v1/servers/:id",
            get(routes::servers::get_server)
                .put(routes::servers::update_server)
                .delete(routes::servers::delete_server),
        )
        .route(
            "/api/v1/servers/:id/agent-config",
            get(routes::servers::get_agent_config).put(routes::servers::set_agent_config),
        )
        .route(
            "/api/v1/servers/:id/metrics/:metric_type",
            get(routes::servers::get_server_metrics),
        )
        .route("/api/v1/alerts", get(routes::alerts::list_alerts))
        .route("/api/v1/alerts/:id", get(routes::alerts::get_alert))
        .route(
            "/api/v1/alerts/:id/resolve",
            put(routes::alerts::resolve_alert),
        )
        .route(
            "/api/v1/alert-rules",
            get(routes::rules::list_rules).post(routes::rules::create_rule),
        )
        .route(
            "/api/v1/alert-rules/:id",
            patch(routes::rules::update_rule)
                .put(routes::rules::update_rule)
                .delete(routes::rules::delete_rule),
        );

    // Add auth middleware if keys are configured
    if !config.api_keys.is_empty() {
        app = app.layer(axum::middleware::from_fn_with_state(
            Arc::new(config.api_keys.clone()),
            middleware::auth::auth_middleware,
        ));
    }

    // Routes added after the auth layer stay public
    let mut app = app
        .route("/api/v1/health", get(routes::health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    // Add CORS if enabled
    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    if config.api_keys.is_empty() {
        tracing::warn!("no API keys configured, the API is open");
    }

    let app = router(&config, state);

    // Bind and serve
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    // Spawn server in background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
