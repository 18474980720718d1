//! Snapshot ingestion: validate, persist, evaluate alerts
//!
//! Snapshots of different servers are processed in parallel. Snapshots of
//! the same server are serialized by a per-server lock, so two concurrent
//! snapshots of one server never race on its breach timers or active alerts.
//! The snapshot rows and the alert transitions they cause are committed in
//! one storage transaction.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, trace, warn};

use crate::alerts::AlertEvaluator;
use crate::error::Result;
use crate::snapshot::{RawSnapshot, Snapshot};
use crate::storage::schema::{Alert, ServerRecordId};
use crate::storage::{StorageBackend, StorageError, StorageResult};

pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one ingested snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResult {
    pub server_record_id: ServerRecordId,
    pub alerts_triggered: Vec<Alert>,
    pub alerts_resolved: Vec<Alert>,
}

/// Per-server async locks, created on demand and dropped once idle
#[derive(Debug, Default)]
struct ServerLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ServerLocks {
    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_for(&self, server_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.map().entry(server_id.to_string()).or_default().clone()
    }

    async fn acquire<'a>(&'a self, server_id: &'a str) -> ServerGuard<'a> {
        let guard = self.lock_for(server_id).lock_owned().await;
        ServerGuard {
            locks: self,
            server_id,
            guard: Some(guard),
        }
    }

    /// Forget the lock of `server_id` if nobody holds or waits for it
    fn release(&self, server_id: &str) {
        let mut locks = self.map();
        // Clones are only made under the map lock, so a count of one is final
        if locks
            .get(server_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(server_id);
            trace!("dropped idle lock of {server_id}");
        }
    }

    fn len(&self) -> usize {
        self.map().len()
    }
}

/// Holds a server's lock and releases its map entry on drop
struct ServerGuard<'a> {
    locks: &'a ServerLocks,
    server_id: &'a str,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ServerGuard<'_> {
    fn drop(&mut self) {
        // The owned guard holds a clone of the Arc, drop it first
        self.guard.take();
        self.locks.release(self.server_id);
    }
}

pub struct IngestionService {
    store: Arc<dyn StorageBackend>,
    evaluator: AlertEvaluator,
    locks: ServerLocks,
    storage_timeout: Duration,
}

impl IngestionService {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        evaluator: AlertEvaluator,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            evaluator,
            locks: ServerLocks::default(),
            storage_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn StorageBackend> {
        &self.store
    }

    /// Ingest a JSON-encoded probe snapshot
    #[instrument(skip_all, fields(bytes = payload.len()))]
    pub async fn ingest_json(&self, payload: &[u8]) -> Result<IngestResult> {
        let raw = RawSnapshot::from_json(payload)?;
        self.ingest(raw).await
    }

    pub async fn ingest(&self, raw: RawSnapshot) -> Result<IngestResult> {
        let snapshot = raw.validate()?;
        self.ingest_snapshot(&snapshot).await
    }

    /// Persist an already validated snapshot and re-check the alert rules
    #[instrument(skip(self, snapshot), fields(server_id = %snapshot.server_id(), timestamp = %snapshot.timestamp()))]
    pub async fn ingest_snapshot(&self, snapshot: &Snapshot) -> Result<IngestResult> {
        let _guard = self.locks.acquire(snapshot.server_id()).await;

        let ingested = with_timeout(
            "ingest snapshot",
            self.storage_timeout,
            self.store.persist_and_evaluate(snapshot, &self.evaluator),
        )
        .await?;

        let server = ingested.server;
        let applied = ingested.applied;

        for alert in &applied.triggered {
            info!(
                "alert {} opened: {} {:?} = {} (threshold {})",
                alert.id, alert.metric_type, alert.subject, alert.metric_value, alert.threshold
            );
        }
        for alert in &applied.resolved {
            info!("alert {} resolved", alert.id);
        }

        debug!(
            "ingested snapshot for server record {server}: {} triggered, {} resolved",
            applied.triggered.len(),
            applied.resolved.len()
        );

        Ok(IngestResult {
            server_record_id: server,
            alerts_triggered: applied.triggered,
            alerts_resolved: applied.resolved,
        })
    }
}

/// Run a storage future with an upper bound on its duration
///
/// The future is dropped on timeout, which rolls back any transaction it
/// had open.
pub async fn with_timeout<T, F>(operation: &'static str, after: Duration, fut: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{operation} did not finish within {after:?}");
            Err(StorageError::Timeout { operation, after })
        }
    }
}
