use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use sysinfo::{Disks, Networks, System};
use tracing::{instrument, trace};

use crate::snapshot::{
    RawBasicInfo, RawCore, RawCpu, RawDisk, RawMemory, RawNetwork, RawSnapshot,
};
use crate::util::get_local_ip;

/// Source of probe snapshots
#[async_trait]
pub trait MetricsCollector: Send {
    async fn collect(&mut self) -> anyhow::Result<RawSnapshot>;
}

/// Collects host telemetry through `sysinfo`
pub struct SysinfoCollector {
    server_id: String,
    system: System,
}

impl SysinfoCollector {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            system: System::new(),
        }
    }

    fn basic_info(&self) -> RawBasicInfo {
        RawBasicInfo {
            server_id: Some(self.server_id.clone()),
            hostname: System::host_name().unwrap_or_default(),
            os: System::long_os_version()
                .or_else(System::name)
                .unwrap_or_default(),
            runtime_version: env!("CARGO_PKG_VERSION").to_string(),
            ip_address: get_local_ip().to_string(),
            timestamp: Some(Utc::now().timestamp()),
            timezone: None,
        }
    }

    fn cpu(&self) -> RawCpu {
        RawCpu {
            total: self.system.global_cpu_usage() as f64,
            cores: self
                .system
                .cpus()
                .iter()
                .map(|cpu| RawCore {
                    cpu: cpu.name().to_string(),
                    usage: cpu.cpu_usage() as f64,
                })
                .collect(),
        }
    }

    fn memory(&self) -> RawMemory {
        let total = self.system.total_memory();
        let used = self.system.used_memory();

        RawMemory {
            total: total as f64,
            used: used as f64,
            free: self.system.free_memory() as f64,
            buffers: None,
            cached: None,
            usage_percent: percent_of(used, total),
        }
    }

    fn disks() -> Vec<RawDisk> {
        let disks = Disks::new_with_refreshed_list();
        let mut seen = HashSet::new();

        disks
            .list()
            .iter()
            .filter_map(|disk| {
                let device = disk.name().to_string_lossy().to_string();
                // One device mounted twice is reported once
                if device.is_empty() || !seen.insert(device.clone()) {
                    return None;
                }

                let total = disk.total_space();
                let free = disk.available_space();
                let used = total.saturating_sub(free);

                Some(RawDisk {
                    device,
                    total: total as f64,
                    used: used as f64,
                    free: free as f64,
                    usage_percent: percent_of(used, total),
                    mount_point: Some(disk.mount_point().to_string_lossy().to_string()),
                })
            })
            .collect()
    }

    fn networks() -> Vec<RawNetwork> {
        let networks = Networks::new_with_refreshed_list();

        let mut interfaces: Vec<RawNetwork> = networks
            .list()
            .iter()
            .map(|(name, data)| RawNetwork {
                interface: name.clone(),
                bytes_sent: data.total_transmitted() as f64,
                bytes_received: data.total_received() as f64,
                packets_sent: data.total_packets_transmitted() as f64,
                packets_received: data.total_packets_received() as f64,
                errors_outgoing: data.total_errors_on_transmitted() as f64,
                errors_incoming: data.total_errors_on_received() as f64,
            })
            .collect();

        interfaces.sort_by(|a, b| a.interface.cmp(&b.interface));
        interfaces
    }
}

#[async_trait]
impl MetricsCollector for SysinfoCollector {
    #[instrument(skip(self), fields(server_id = %self.server_id))]
    async fn collect(&mut self) -> anyhow::Result<RawSnapshot> {
        // CPU usage is a delta between two refreshes
        self.system.refresh_cpu_usage();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let snapshot = RawSnapshot {
            basic_info: self.basic_info(),
            cpu: self.cpu(),
            memory: self.memory(),
            disk: Self::disks(),
            network: Self::networks(),
        };

        trace!(
            "collected snapshot: cpu {:.1}%, {} disks, {} interfaces",
            snapshot.cpu.total,
            snapshot.disk.len(),
            snapshot.network.len()
        );

        Ok(snapshot)
    }
}

fn percent_of(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 100.0).min(100.0)
}

/// The collector used by the agent binary
pub fn default_collector(server_id: impl Into<String>) -> Box<dyn MetricsCollector> {
    Box::new(SysinfoCollector::new(server_id))
}
