//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement. Services receive the backend
//! as an `Arc<dyn StorageBackend>`; nothing in the crate reaches for a
//! global database handle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StorageResult;
use super::schema::{
    AgentConfig, Alert, AlertId, AlertRuleId, AlertStatus, AlertTransition, AppliedTransitions,
    MetricSeries, MetricType, NewAlertRule, RuleRecord, RuleStates, RuleUpdate, Server,
    ServerRecordId, ServerStatus, ServerUpdate,
};
use crate::snapshot::Snapshot;

/// Largest page size any listing returns
pub const MAX_PAGE_SIZE: u32 = 500;

/// Query parameters for fetching samples within a time range
#[derive(Debug, Clone)]
pub struct QueryRange {
    /// Start of time range (inclusive)
    pub start: DateTime<Utc>,

    /// End of time range (inclusive)
    pub end: DateTime<Utc>,

    /// Maximum number of results to return
    pub limit: Option<usize>,
}

/// 1-based pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Page {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn limit(&self) -> i64 {
        self.per_page as i64
    }

    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.per_page as i64
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 50)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerFilter {
    pub status: Option<ServerStatus>,

    /// Case-insensitive substring of the hostname
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub server_id: Option<ServerRecordId>,
    pub metric_type: Option<MetricType>,
}

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Decides alert transitions from the stored state of one server
///
/// Called by [`StorageBackend::persist_and_evaluate`] inside its transaction,
/// so implementations must not block.
pub trait TransitionPlanner: Send + Sync {
    fn plan_transitions(
        &self,
        server: ServerRecordId,
        rules: Vec<RuleRecord>,
        states: &RuleStates,
        snapshot: &Snapshot,
    ) -> Vec<AlertTransition>;
}

/// Outcome of [`StorageBackend::persist_and_evaluate`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ingested {
    pub server: ServerRecordId,
    pub applied: AppliedTransitions,
}

/// Trait for persistent storage backends
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across
/// concurrent ingestion requests.
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>`. Implementations convert
/// backend-specific errors to `StorageError` variants and never retry.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Persist one snapshot atomically
    ///
    /// Upserts the server record by `server_id`, then appends the cpu,
    /// memory, disk and network samples. Disk and network rows whose
    /// (server, device/interface, timestamp) key already exists are skipped.
    /// If any step fails, nothing of the snapshot is visible afterwards.
    async fn persist(&self, snapshot: &Snapshot) -> StorageResult<ServerRecordId>;

    /// Persist one snapshot and apply the alert transitions it causes
    ///
    /// Runs in a single transaction: the snapshot is written as in
    /// [`StorageBackend::persist`], then the enabled rules of the server and
    /// their durable state are read and handed to `planner`, and the planned
    /// transitions are applied. Any failure rolls back the snapshot too.
    ///
    /// Opening an alert for a key that already has an active one is a no-op,
    /// as is resolving an alert that is no longer active.
    async fn persist_and_evaluate(
        &self,
        snapshot: &Snapshot,
        planner: &dyn TransitionPlanner,
    ) -> StorageResult<Ingested>;

    // ========================================================================
    // Queries
    // ========================================================================

    async fn find_server(&self, server_id: &str) -> StorageResult<Option<Server>>;

    /// Look a server up by its internal id
    async fn get_server(&self, id: ServerRecordId) -> StorageResult<Option<Server>>;

    async fn list_servers(&self, filter: &ServerFilter, page: Page) -> StorageResult<Vec<Server>>;

    /// Samples of one metric family within a time range, oldest first
    async fn query_metrics(
        &self,
        server: ServerRecordId,
        metric_type: MetricType,
        range: &QueryRange,
    ) -> StorageResult<MetricSeries>;

    /// Alerts, newest first
    async fn list_alerts(&self, filter: &AlertFilter, page: Page) -> StorageResult<Vec<Alert>>;

    async fn get_alert(&self, id: AlertId) -> StorageResult<Option<Alert>>;

    /// Resolve an alert by hand at `resolved_at`
    ///
    /// An alert that is already resolved is returned unchanged. Returns
    /// `None` for unknown alerts.
    async fn resolve_alert(
        &self,
        id: AlertId,
        resolved_at: DateTime<Utc>,
    ) -> StorageResult<Option<Alert>>;

    // ========================================================================
    // Server administration
    // ========================================================================

    /// Apply admin changes to a server, `None` for unknown servers
    async fn update_server(
        &self,
        id: ServerRecordId,
        update: &ServerUpdate,
    ) -> StorageResult<Option<Server>>;

    /// Delete a server together with its samples, alerts, breach timers,
    /// server-scoped rules and agent config
    ///
    /// Returns `false` for unknown servers. A later snapshot registers the
    /// server again.
    async fn delete_server(&self, id: ServerRecordId) -> StorageResult<bool>;

    /// Stored agent config of a server, `None` if none was set
    async fn get_agent_config(&self, server: ServerRecordId) -> StorageResult<Option<AgentConfig>>;

    /// Create or replace the agent config of a server
    async fn set_agent_config(
        &self,
        server: ServerRecordId,
        config: &AgentConfig,
    ) -> StorageResult<AgentConfig>;

    // ========================================================================
    // Rule administration
    // ========================================================================

    async fn list_rules(&self) -> StorageResult<Vec<RuleRecord>>;

    async fn create_rule(&self, rule: &NewAlertRule) -> StorageResult<RuleRecord>;

    /// Change threshold, comparison, duration or enabled flag of a rule
    ///
    /// Changing the condition or disabling the rule drops its breach timers,
    /// so tracking restarts from zero. Active alerts stay open until a sample
    /// no longer breaches the updated rule. Returns `None` for unknown rules.
    async fn update_rule(
        &self,
        id: AlertRuleId,
        update: &RuleUpdate,
    ) -> StorageResult<Option<RuleRecord>>;

    /// Delete a rule
    ///
    /// Alerts still active for the rule are resolved; historical alerts keep
    /// their row with the rule reference cleared. Returns `false` for
    /// unknown rules.
    async fn delete_rule(&self, id: AlertRuleId) -> StorageResult<bool>;

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Mark active servers not seen since `last_seen_before` as inactive
    ///
    /// Returns the number of servers updated.
    async fn mark_stale_servers(&self, last_seen_before: DateTime<Utc>) -> StorageResult<usize>;

    /// Delete samples older than the specified timestamp
    ///
    /// Used for retention policy enforcement. Alerts are kept.
    /// Returns the number of sample rows deleted.
    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Check backend health
    ///
    /// Performs a lightweight operation to verify the backend
    /// is operational (e.g., ping database, check file access).
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Get backend-specific statistics
    ///
    /// Returns human-readable stats about the backend
    /// (e.g., "SQLite: 3 servers, 1.2M samples, 450MB on disk").
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
