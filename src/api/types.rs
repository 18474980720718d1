//! Request and response types of the REST API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actors::messages::MaintenanceStats;
use crate::storage::backend::Page;
use crate::storage::schema::{Alert, MetricSeries, RuleRecord, Server};

/// Default number of samples returned by a metrics query
pub const DEFAULT_SAMPLE_LIMIT: usize = 1000;

/// Upper bound on samples returned by a metrics query
pub const MAX_SAMPLE_LIMIT: usize = 10_000;

// ============================================================================
// Query parameters
// ============================================================================

fn page_of(page: Option<u32>, per_page: Option<u32>) -> Page {
    let default = Page::default();
    Page::new(
        page.unwrap_or(default.page),
        per_page.unwrap_or(default.per_page),
    )
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerListQuery {
    pub status: Option<String>,
    pub hostname: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ServerListQuery {
    pub fn page(&self) -> Page {
        page_of(self.page, self.per_page)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertListQuery {
    pub status: Option<String>,

    /// External server id
    pub server: Option<String>,

    pub metric_type: Option<String>,

    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl AlertListQuery {
    pub fn page(&self) -> Page {
        page_of(self.page, self.per_page)
    }
}

/// Time range for metric queries
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricQuery {
    /// Start time (RFC 3339, default: one hour before `end`)
    pub start: Option<DateTime<Utc>>,

    /// End time (RFC 3339, default: now)
    pub end: Option<DateTime<Utc>>,

    /// Max results (default: 1000)
    pub limit: Option<usize>,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub timestamp: String,
    pub storage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance: Option<MaintenanceStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServersResponse {
    pub servers: Vec<Server>,
    pub count: usize,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub count: usize,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesResponse {
    pub rules: Vec<RuleRecord>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub server_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: usize,
    pub series: MetricSeries,
}
