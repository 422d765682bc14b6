//! # relay-persistence
//!
//! Persistence and resilience layer of an AI-provider proxy gateway.
//!
//! Owns a PostgreSQL cluster (one writable primary, any number of read
//! replicas), applies versioned schema migrations, runs retrying
//! transactions and absorbs high-volume telemetry through in-memory
//! batching with background flush.
//!
//! ## Architecture
//!
//! ```text
//! Gateway request pipeline
//!     │  UsageReport
//!     ├── PluginRegistry ──► UsageStatsWriter / RequestLogWriter (telemetry/)
//!     │                          │ buffered, flushed on size or tick
//!     │                          ▼
//!     ├── Repository (persistence/repository)
//!     │       ├── QuerySet     single-row CRUD and upserts
//!     │       ├── Batch        multi-row inserts, additive merge
//!     │       ├── Analytics    GROUP BY reads on a replica
//!     │       └── MigrationManager
//!     │
//!     └── Cluster (persistence/cluster)
//!             ├── primary pool   (writes)
//!             └── replica pools  (round-robin reads)
//! ```
//!
//! The binary wires these together and serves `GET /health` and
//! `GET /health/migrations` (api/).

pub mod api;
pub mod app_state;
pub mod config;
pub mod error;
pub mod persistence;
pub mod telemetry;
