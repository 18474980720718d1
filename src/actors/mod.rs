//! Background actors of the hub
//!
//! Each actor runs as an independent async task and is controlled through a
//! cloneable handle that wraps its mpsc command channel.
//!
//! ## Actor Types
//!
//! - **MaintenanceActor**: marks silent servers inactive and enforces sample
//!   retention
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Request/Response**: oneshot channels for synchronous queries

pub mod maintenance;
pub mod messages;

pub use maintenance::{MaintenanceHandle, MaintenanceSettings};
