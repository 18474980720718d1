//! Durable storage for servers, samples, rules and alerts
//!
//! ## Design
//!
//! - **Trait-based**: services hold an `Arc<dyn StorageBackend>`, tests can
//!   swap in their own implementation
//! - **Async**: every operation is async so it composes with the Tokio runtime
//! - **Transactional**: a snapshot and a batch of alert transitions are each
//!   committed as one unit
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database, good for <100 servers
//!
//! ## Usage
//!
//! ```no_run
//! use probewatch::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./probewatch.db").await?;
//!     println!("{}", backend.get_stats().await?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod schema;
pub mod sqlite;

pub use backend::{AlertFilter, HealthStatus, Page, QueryRange, ServerFilter, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use schema::{
    AgentConfig, Alert, AlertId, AlertRuleId, AlertStatus, Comparison, MetricSeries, MetricType,
    NewAlertRule, RuleRecord, RuleUpdate, Server, ServerRecordId, ServerStatus, ServerUpdate,
};
