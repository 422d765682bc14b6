//! Telemetry ingestion: batching writers for usage stats and request logs.
//!
//! The writers plug into the gateway's usage-reporting registry through
//! [`plugin::PluginRegistry`] and flush into the repository's batch API.

pub mod plugin;
pub mod writer;
