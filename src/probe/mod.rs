//! Probe side: collect local telemetry and push it to the hub
//!
//! The agent binary picks a collector once at startup through
//! [`default_collector`] and hands every snapshot to a [`HubClient`].

pub mod client;
pub mod collector;

pub use client::HubClient;
pub use collector::{MetricsCollector, SysinfoCollector, default_collector};
