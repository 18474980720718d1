//! Message types for actor communication
//!
//! Commands are sent to a specific actor over its mpsc channel. Commands
//! that expect an answer carry a oneshot `respond_to` sender.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::storage::StorageError;

/// Commands that can be sent to the MaintenanceActor
#[derive(Debug)]
pub enum MaintenanceCommand {
    /// Run a maintenance pass immediately (bypassing the interval timer)
    RunNow {
        respond_to: oneshot::Sender<Result<MaintenanceReport, StorageError>>,
    },

    /// Get maintenance statistics
    GetStats {
        respond_to: oneshot::Sender<MaintenanceStats>,
    },

    /// Gracefully shut down the maintenance actor
    Shutdown,
}

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Servers switched from `active` to `inactive`
    pub servers_marked_inactive: usize,

    /// Sample rows removed by the retention policy
    pub samples_deleted: usize,
}

/// Maintenance statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceStats {
    /// Number of completed passes
    pub runs: u64,

    /// Passes that hit a storage error
    pub failures: u64,

    pub last_run: Option<DateTime<Utc>>,

    pub total_servers_marked_inactive: u64,

    pub total_samples_deleted: u64,
}
