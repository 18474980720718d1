//! Row types and enums shared by every storage backend
//!
//! ## Tables
//!
//! - `servers`: one row per probe `server_id`, upserted on every snapshot
//! - `cpu_samples`, `memory_samples`: one row per snapshot
//! - `disk_samples`, `network_samples`: one row per (server, device, timestamp),
//!   a resend with the same key is ignored
//! - `alert_rules`: thresholds, optionally scoped to one server
//! - `alerts`: fired rule instances, at most one active per (server, rule, subject)
//! - `rule_breaches`: durable breach timers for rules that are not yet firing
//! - `agent_configs`: collection settings handed out to a server's agent
//!
//! All timestamps are stored as Unix milliseconds.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Internal (database) id of a server row
pub type ServerRecordId = i64;

pub type AlertRuleId = i64;

pub type AlertId = i64;

/// A string could not be parsed into one of the storage enums
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{value}`")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Metric families alert rules can watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Cpu,
    Memory,
    Disk,
    Network,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Cpu => "cpu",
            MetricType::Memory => "memory",
            MetricType::Disk => "disk",
            MetricType::Network => "network",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(MetricType::Cpu),
            "memory" => Ok(MetricType::Memory),
            "disk" => Ok(MetricType::Disk),
            "network" => Ok(MetricType::Network),
            other => Err(ParseEnumError::new("metric type", other)),
        }
    }
}

/// Comparison operator of an alert rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "=")]
    Equal,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::GreaterThan => ">",
            Comparison::LessThan => "<",
            Comparison::GreaterOrEqual => ">=",
            Comparison::LessOrEqual => "<=",
            Comparison::Equal => "=",
        }
    }

    /// Does `value <op> threshold` hold?
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::LessThan => value < threshold,
            Comparison::GreaterOrEqual => value >= threshold,
            Comparison::LessOrEqual => value <= threshold,
            Comparison::Equal => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparison {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(Comparison::GreaterThan),
            "<" => Ok(Comparison::LessThan),
            ">=" => Ok(Comparison::GreaterOrEqual),
            "<=" => Ok(Comparison::LessOrEqual),
            "=" => Ok(Comparison::Equal),
            other => Err(ParseEnumError::new("comparison", other)),
        }
    }
}

/// Lifecycle status of a server record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Active,
    Inactive,
    Warning,
    Error,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Active => "active",
            ServerStatus::Inactive => "inactive",
            ServerStatus::Warning => "warning",
            ServerStatus::Error => "error",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ServerStatus::Active),
            "inactive" => Ok(ServerStatus::Inactive),
            "warning" => Ok(ServerStatus::Warning),
            "error" => Ok(ServerStatus::Error),
            other => Err(ParseEnumError::new("server status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AlertStatus::Active),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(ParseEnumError::new("alert status", other)),
        }
    }
}

/// A registered server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerRecordId,
    pub server_id: String,
    pub hostname: String,
    pub ip_address: String,
    pub os: String,
    pub runtime_version: String,
    pub status: ServerStatus,
    pub timezone: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Admin changes to a server record
///
/// `None` leaves a field untouched, an empty string clears an optional
/// field. Hostname and timezone are overwritten again by the server's next
/// snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerUpdate {
    pub hostname: Option<String>,
    pub status: Option<ServerStatus>,
    pub timezone: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuSample {
    pub timestamp: DateTime<Utc>,
    pub total_usage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    pub timestamp: DateTime<Utc>,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub buffers: Option<u64>,
    pub cached: Option<u64>,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSample {
    pub timestamp: DateTime<Utc>,
    pub device: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub usage_percent: f64,
    pub mount_point: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSample {
    pub timestamp: DateTime<Utc>,
    pub interface: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub errors_outgoing: u64,
    pub errors_incoming: u64,
}

/// Time series for one metric family of one server, oldest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric_type", content = "samples", rename_all = "snake_case")]
pub enum MetricSeries {
    Cpu(Vec<CpuSample>),
    Memory(Vec<MemorySample>),
    Disk(Vec<DiskSample>),
    Network(Vec<NetworkSample>),
}

impl MetricSeries {
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricSeries::Cpu(_) => MetricType::Cpu,
            MetricSeries::Memory(_) => MetricType::Memory,
            MetricSeries::Disk(_) => MetricType::Disk,
            MetricSeries::Network(_) => MetricType::Network,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MetricSeries::Cpu(s) => s.len(),
            MetricSeries::Memory(s) => s.len(),
            MetricSeries::Disk(s) => s.len(),
            MetricSeries::Network(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An alert rule exactly as stored
///
/// Rules can be edited outside this process, so the textual columns are
/// kept raw here and only parsed when the rule is evaluated
/// (see [`crate::alerts::AlertRule`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub id: AlertRuleId,
    pub server_id: Option<ServerRecordId>,
    pub metric_type: String,
    pub threshold: f64,
    pub comparison: String,
    /// Seconds the condition must hold before the rule fires
    pub duration: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlertRule {
    #[serde(default)]
    pub server_id: Option<ServerRecordId>,
    pub metric_type: MetricType,
    pub threshold: f64,
    pub comparison: Comparison,
    #[serde(default = "default_rule_duration")]
    pub duration: u32,
    #[serde(default = "default_rule_enabled")]
    pub enabled: bool,
}

fn default_rule_duration() -> u32 {
    60
}

fn default_rule_enabled() -> bool {
    true
}

/// Changes to an alert rule, `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleUpdate {
    pub threshold: Option<f64>,
    pub comparison: Option<Comparison>,
    pub duration: Option<u32>,
    pub enabled: Option<bool>,
}

impl RuleUpdate {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.threshold.is_none()
            && self.comparison.is_none()
            && self.duration.is_none()
            && self.enabled.is_none()
    }

    /// Running breach timers no longer mean the same thing after this update
    pub fn resets_breaches(&self) -> bool {
        self.threshold.is_some() || self.comparison.is_some() || self.enabled == Some(false)
    }
}

/// Collection settings the hub hands out to the agent of one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Seconds between two snapshots
    #[serde(default = "default_update_interval")]
    pub update_interval: u32,

    /// `false` keeps the agent collecting without pushing
    #[serde(default = "default_send_to_api")]
    pub send_to_api: bool,

    /// Hub base URL the agent should push to instead of its own
    #[serde(default)]
    pub api_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_update_interval() -> u32 {
    60
}

fn default_send_to_api() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            update_interval: default_update_interval(),
            send_to_api: default_send_to_api(),
            api_url: None,
            api_key: None,
        }
    }
}

/// A fired rule instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub server_id: ServerRecordId,
    pub alert_rule_id: Option<AlertRuleId>,
    pub metric_type: MetricType,
    /// Device or interface for disk/network alerts, empty otherwise
    pub subject: String,
    pub metric_value: f64,
    pub threshold: f64,
    pub status: AlertStatus,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Identifies one independently tracked breach: a rule applied to one
/// device/interface (or to the whole server)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub rule_id: AlertRuleId,
    pub subject: String,
}

impl RuleKey {
    pub fn new(rule_id: AlertRuleId, subject: impl Into<String>) -> Self {
        Self {
            rule_id,
            subject: subject.into(),
        }
    }
}

/// Durable evaluation state of one [`RuleKey`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleState {
    /// First sample of the current uninterrupted breach
    pub breach_started_at: Option<DateTime<Utc>>,

    /// Currently active alert, if any
    pub active_alert: Option<AlertId>,

    /// When the most recent alert for this key was resolved
    pub last_resolved_at: Option<DateTime<Utc>>,
}

pub type RuleStates = HashMap<RuleKey, RuleState>;

/// Alert to be opened
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub key: RuleKey,
    pub metric_type: MetricType,
    pub metric_value: f64,
    pub threshold: f64,
    pub triggered_at: DateTime<Utc>,
}

/// A state change decided by the evaluator, applied by a backend
#[derive(Debug, Clone, PartialEq)]
pub enum AlertTransition {
    /// Start the breach timer for a key
    StartBreach { key: RuleKey, at: DateTime<Utc> },

    /// Drop the breach timer for a key
    ClearBreach { key: RuleKey },

    /// Open an alert and drop the breach timer
    Trigger(NewAlert),

    /// Resolve an active alert
    Resolve {
        alert_id: AlertId,
        resolved_at: DateTime<Utc>,
    },
}

/// Alerts opened and resolved by one batch of transitions
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppliedTransitions {
    pub triggered: Vec<Alert>,
    pub resolved: Vec<Alert>,
}
