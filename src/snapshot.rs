//! Probe snapshot model
//!
//! A probe sends one [`RawSnapshot`] per reading. Before anything touches
//! storage, the raw payload is validated and normalized into a [`Snapshot`]:
//!
//! - `server_id` and `timestamp` must be present
//! - every numeric field must be finite and non-negative
//! - percentages are clamped to `[0, 100]`
//! - disk devices and network interfaces must be named
//!
//! Anything that fails these checks is rejected with a [`ValidationError`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::schema::MetricType;

/// Errors raised while decoding or validating a probe snapshot
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed snapshot payload: {0}")]
    Malformed(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` must not be negative (got {value})")]
    Negative { field: String, value: f64 },

    #[error("field `{0}` must be a finite number")]
    NonFinite(String),

    #[error("field `{0}` must not be empty")]
    EmptyName(String),

    #[error("timestamp {0} is out of range")]
    TimestampOutOfRange(i64),

    #[error("invalid alert rule: {0}")]
    InvalidRule(String),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Snapshot payload exactly as a probe sends it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSnapshot {
    pub basic_info: RawBasicInfo,
    pub cpu: RawCpu,
    pub memory: RawMemory,
    #[serde(default)]
    pub disk: Vec<RawDisk>,
    #[serde(default)]
    pub network: Vec<RawNetwork>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBasicInfo {
    pub server_id: Option<String>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, alias = "php_version")]
    pub runtime_version: String,
    #[serde(default)]
    pub ip_address: String,
    /// Unix timestamp (seconds)
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCpu {
    pub total: f64,
    #[serde(default)]
    pub cores: Vec<RawCore>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCore {
    pub cpu: String,
    pub usage: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMemory {
    pub total: f64,
    pub used: f64,
    pub free: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffers: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<f64>,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDisk {
    pub device: String,
    pub total: f64,
    pub used: f64,
    pub free: f64,
    pub usage_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNetwork {
    pub interface: String,
    pub bytes_sent: f64,
    pub bytes_received: f64,
    pub packets_sent: f64,
    pub packets_received: f64,
    pub errors_outgoing: f64,
    pub errors_incoming: f64,
}

/// Validated, normalized probe reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub basic_info: BasicInfo,
    pub cpu: CpuReading,
    pub memory: MemoryReading,
    pub disks: Vec<DiskReading>,
    pub networks: Vec<NetworkReading>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasicInfo {
    pub server_id: String,
    pub hostname: String,
    pub os: String,
    pub runtime_version: String,
    pub ip_address: String,
    pub timezone: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuReading {
    /// Total usage in percent (0-100)
    pub total: f64,
    pub cores: Vec<CoreReading>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoreReading {
    pub name: String,
    pub usage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryReading {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub buffers: Option<u64>,
    pub cached: Option<u64>,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskReading {
    pub device: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub usage_percent: f64,
    pub mount_point: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkReading {
    pub interface: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub errors_outgoing: u64,
    pub errors_incoming: u64,
}

/// One value an alert rule can be evaluated against
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub metric_type: MetricType,

    /// Device or interface name; empty for server-wide metrics
    pub subject: String,

    pub value: f64,
}

impl RawSnapshot {
    /// Decode a JSON payload without validating it
    pub fn from_json(payload: &[u8]) -> Result<Self, ValidationError> {
        serde_json::from_slice(payload).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Validate and normalize this payload
    pub fn validate(self) -> Result<Snapshot, ValidationError> {
        Snapshot::try_from(self)
    }
}

impl TryFrom<RawSnapshot> for Snapshot {
    type Error = ValidationError;

    fn try_from(raw: RawSnapshot) -> Result<Self, Self::Error> {
        let RawSnapshot {
            basic_info,
            cpu,
            memory,
            disk,
            network,
        } = raw;

        let server_id = basic_info
            .server_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(ValidationError::MissingField("basic_info.server_id"))?;

        let secs = basic_info
            .timestamp
            .ok_or(ValidationError::MissingField("basic_info.timestamp"))?;
        if secs < 0 {
            return Err(ValidationError::Negative {
                field: "basic_info.timestamp".to_string(),
                value: secs as f64,
            });
        }
        let timestamp =
            DateTime::from_timestamp(secs, 0).ok_or(ValidationError::TimestampOutOfRange(secs))?;

        let cores = cpu
            .cores
            .into_iter()
            .enumerate()
            .map(|(i, core)| {
                Ok(CoreReading {
                    name: core.cpu,
                    usage: percent(&format!("cpu.cores[{i}].usage"), core.usage)?,
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        let memory = MemoryReading {
            total: counter("memory.total", memory.total)?,
            used: counter("memory.used", memory.used)?,
            free: counter("memory.free", memory.free)?,
            buffers: memory
                .buffers
                .map(|v| counter("memory.buffers", v))
                .transpose()?,
            cached: memory
                .cached
                .map(|v| counter("memory.cached", v))
                .transpose()?,
            usage_percent: percent("memory.usage_percent", memory.usage_percent)?,
        };

        let disks = disk
            .into_iter()
            .enumerate()
            .map(|(i, d)| {
                let device = name(&format!("disk[{i}].device"), d.device)?;
                Ok(DiskReading {
                    total: counter(&format!("disk[{i}].total"), d.total)?,
                    used: counter(&format!("disk[{i}].used"), d.used)?,
                    free: counter(&format!("disk[{i}].free"), d.free)?,
                    usage_percent: percent(&format!("disk[{i}].usage_percent"), d.usage_percent)?,
                    mount_point: d.mount_point,
                    device,
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        let networks = network
            .into_iter()
            .enumerate()
            .map(|(i, n)| {
                let field = |f: &str| format!("network[{i}].{f}");
                Ok(NetworkReading {
                    interface: name(&field("interface"), n.interface)?,
                    bytes_sent: counter(&field("bytes_sent"), n.bytes_sent)?,
                    bytes_received: counter(&field("bytes_received"), n.bytes_received)?,
                    packets_sent: counter(&field("packets_sent"), n.packets_sent)?,
                    packets_received: counter(&field("packets_received"), n.packets_received)?,
                    errors_outgoing: counter(&field("errors_outgoing"), n.errors_outgoing)?,
                    errors_incoming: counter(&field("errors_incoming"), n.errors_incoming)?,
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        Ok(Snapshot {
            basic_info: BasicInfo {
                server_id,
                hostname: basic_info.hostname,
                os: basic_info.os,
                runtime_version: basic_info.runtime_version,
                ip_address: basic_info.ip_address,
                timezone: basic_info.timezone,
                timestamp,
            },
            cpu: CpuReading {
                total: percent("cpu.total", cpu.total)?,
                cores,
            },
            memory,
            disks,
            networks,
        })
    }
}

impl Snapshot {
    /// Decode and validate a JSON payload in one step
    pub fn from_json(payload: &[u8]) -> Result<Self, ValidationError> {
        RawSnapshot::from_json(payload)?.validate()
    }

    pub fn server_id(&self) -> &str {
        &self.basic_info.server_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.basic_info.timestamp
    }

    /// Values alert rules are evaluated against
    ///
    /// - cpu: total usage
    /// - memory: usage percent
    /// - disk: usage percent per device
    /// - network: bytes sent + received per interface
    pub fn metric_samples(&self) -> Vec<MetricSample> {
        let mut samples = Vec::with_capacity(2 + self.disks.len() + self.networks.len());

        samples.push(MetricSample {
            metric_type: MetricType::Cpu,
            subject: String::new(),
            value: self.cpu.total,
        });
        samples.push(MetricSample {
            metric_type: MetricType::Memory,
            subject: String::new(),
            value: self.memory.usage_percent,
        });

        samples.extend(self.disks.iter().map(|disk| MetricSample {
            metric_type: MetricType::Disk,
            subject: disk.device.clone(),
            value: disk.usage_percent,
        }));

        samples.extend(self.networks.iter().map(|net| MetricSample {
            metric_type: MetricType::Network,
            subject: net.interface.clone(),
            value: net.bytes_sent.saturating_add(net.bytes_received) as f64,
        }));

        samples
    }
}

fn finite(field: &str, value: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFinite(field.to_string()));
    }
    if value < 0.0 {
        return Err(ValidationError::Negative {
            field: field.to_string(),
            value,
        });
    }
    Ok(value)
}

fn percent(field: &str, value: f64) -> Result<f64, ValidationError> {
    finite(field, value).map(|v| v.min(100.0))
}

fn counter(field: &str, value: f64) -> Result<u64, ValidationError> {
    finite(field, value).map(|v| v as u64)
}

fn name(field: &str, value: String) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyName(field.to_string()));
    }
    Ok(trimmed.to_string())
}
