//! probewatch: server telemetry ingestion and threshold alerting
//!
//! A probe agent pushes snapshots of host telemetry to the hub. The hub
//! validates each snapshot, then persists it and re-evaluates the alert rules
//! of the reporting server against the fresh values in one transaction.
//!
//! ## Pipeline
//!
//! ```text
//! probe --JSON--> api --> ingest --> storage (persist + transitions, one tx)
//!                                       |
//!                                       +--> alerts (plan transitions)
//! ```

pub mod actors;
pub mod alerts;
pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod probe;
pub mod query;
pub mod snapshot;
pub mod storage;
pub mod util;

pub use error::{Error, Result};
pub use ingest::{IngestResult, IngestionService};
pub use query::QueryService;
pub use snapshot::{RawSnapshot, Snapshot, ValidationError};
