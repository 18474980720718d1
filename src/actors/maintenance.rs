//! MaintenanceActor - periodic housekeeping of the store
//!
//! Every tick the actor:
//! 1. Marks active servers that have not reported for `stale_after` as inactive
//! 2. Deletes samples older than the retention period, if one is configured
//!
//! Alerts are never deleted. A failed pass is logged and retried on the next
//! tick.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, info, instrument, trace};

use super::messages::{MaintenanceCommand, MaintenanceReport, MaintenanceStats};
use crate::config::{StorageConfig, seconds};
use crate::storage::{StorageBackend, StorageResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceSettings {
    /// Time between two passes
    pub interval: Duration,

    pub stale_after: chrono::Duration,

    /// `None` keeps samples forever
    pub retention: Option<chrono::Duration>,
}

/// Longest accepted time between two passes
const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

impl TryFrom<&StorageConfig> for MaintenanceSettings {
    type Error = anyhow::Error;

    fn try_from(config: &StorageConfig) -> anyhow::Result<Self> {
        let interval = Duration::from_secs(config.maintenance_interval_secs.max(1));
        if interval > MAX_INTERVAL {
            bail!(
                "storage.maintenance_interval_secs {} is longer than a year",
                config.maintenance_interval_secs
            );
        }

        let stale_after = within_reach(seconds(config.stale_after_secs)).with_context(|| {
            format!(
                "storage.stale_after_secs {} is out of range",
                config.stale_after_secs
            )
        })?;

        let retention = config
            .retention_days
            .map(|days| {
                within_reach(chrono::Duration::try_days(days.into()))
                    .with_context(|| format!("storage.retention_days {days} is out of range"))
            })
            .transpose()?;

        Ok(Self {
            interval,
            stale_after,
            retention,
        })
    }
}

/// Keep a duration only if it can be subtracted from the current time
fn within_reach(duration: Option<chrono::Duration>) -> Option<chrono::Duration> {
    duration.filter(|d| Utc::now().checked_sub_signed(*d).is_some())
}

/// `now - age`, clamped to the earliest representable time
fn cutoff(now: DateTime<Utc>, age: chrono::Duration) -> DateTime<Utc> {
    now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub struct MaintenanceActor {
    store: Arc<dyn StorageBackend>,
    settings: MaintenanceSettings,
    command_rx: mpsc::Receiver<MaintenanceCommand>,
    stats: MaintenanceStats,
}

impl MaintenanceActor {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        settings: MaintenanceSettings,
        command_rx: mpsc::Receiver<MaintenanceCommand>,
    ) -> Self {
        Self {
            store,
            settings,
            command_rx,
            stats: MaintenanceStats::default(),
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(
            "starting maintenance actor (interval: {:?}, retention: {:?})",
            self.settings.interval, self.settings.retention
        );

        // First pass one interval after start
        let mut interval = time::interval_at(
            time::Instant::now() + self.settings.interval,
            self.settings.interval,
        );
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    trace!("maintenance tick");
                    if let Err(e) = self.run_pass().await {
                        error!("maintenance pass failed: {e}");
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }

                else => {
                    debug!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("maintenance actor stopped");
    }

    /// Returns `false` once the actor should stop
    async fn handle_command(&mut self, cmd: MaintenanceCommand) -> bool {
        match cmd {
            MaintenanceCommand::RunNow { respond_to } => {
                debug!("manual maintenance pass requested");
                let result = self.run_pass().await;
                let _ = respond_to.send(result);
                true
            }

            MaintenanceCommand::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats.clone());
                true
            }

            MaintenanceCommand::Shutdown => {
                debug!("received shutdown command");
                false
            }
        }
    }

    async fn run_pass(&mut self) -> StorageResult<MaintenanceReport> {
        let result = self.maintain().await;

        self.stats.last_run = Some(Utc::now());
        match &result {
            Ok(report) => {
                self.stats.runs += 1;
                self.stats.total_servers_marked_inactive += report.servers_marked_inactive as u64;
                self.stats.total_samples_deleted += report.samples_deleted as u64;
            }
            Err(_) => self.stats.failures += 1,
        }

        result
    }

    async fn maintain(&self) -> StorageResult<MaintenanceReport> {
        let now = Utc::now();

        let servers_marked_inactive = self
            .store
            .mark_stale_servers(cutoff(now, self.settings.stale_after))
            .await?;

        let samples_deleted = match self.settings.retention {
            Some(retention) => {
                self.store
                    .cleanup_old_samples(cutoff(now, retention))
                    .await?
            }
            None => 0,
        };

        let report = MaintenanceReport {
            servers_marked_inactive,
            samples_deleted,
        };

        if report != MaintenanceReport::default() {
            info!(
                "maintenance: {} servers marked inactive, {} samples deleted",
                report.servers_marked_inactive, report.samples_deleted
            );
        }

        Ok(report)
    }
}

/// Handle for controlling the MaintenanceActor
#[derive(Clone)]
pub struct MaintenanceHandle {
    sender: mpsc::Sender<MaintenanceCommand>,
}

impl MaintenanceHandle {
    /// Spawn a new maintenance actor
    pub fn spawn(store: Arc<dyn StorageBackend>, settings: MaintenanceSettings) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = MaintenanceActor::new(store, settings, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a maintenance pass now and wait for its report
    pub async fn run_now(&self) -> anyhow::Result<MaintenanceReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MaintenanceCommand::RunNow { respond_to: tx })
            .await?;

        Ok(rx.await??)
    }

    /// Get maintenance statistics
    pub async fn get_stats(&self) -> Option<MaintenanceStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MaintenanceCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Shut down the actor
    pub async fn shutdown(&self) {
        let _ = self.sender.send(MaintenanceCommand::Shutdown).await;
    }
}
