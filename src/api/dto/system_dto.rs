//! Health and migration-status response bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::persistence::migrations::{MigrationState, MigrationStatus};

/// Health check response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`.
    pub status: String,
    /// `up` when the primary answered within the deadline, else `down`.
    pub database: String,
    /// RFC 3339 time of the check.
    pub timestamp: String,
    /// Crate version.
    pub version: String,
}

/// One registered migration.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MigrationStatusDto {
    /// Fixed-width version string.
    pub version: String,
    /// Migration name.
    pub name: String,
    /// `applied` or `pending`.
    pub state: String,
    /// When it was applied.
    pub applied_at: Option<DateTime<Utc>>,
}

impl From<MigrationStatus> for MigrationStatusDto {
    fn from(status: MigrationStatus) -> Self {
        let state = match status.state {
            MigrationState::Applied => "applied",
            MigrationState::Pending => "pending",
        };
        Self {
            version: status.version,
            name: status.name,
            state: state.to_string(),
            applied_at: status.applied_at,
        }
    }
}

/// Every registered migration in registration order.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MigrationStatusResponse {
    /// Status per migration.
    pub migrations: Vec<MigrationStatusDto>,
    /// Number still pending.
    pub pending: usize,
}

impl From<Vec<MigrationStatus>> for MigrationStatusResponse {
    fn from(statuses: Vec<MigrationStatus>) -> Self {
        let pending = statuses
            .iter()
            .filter(|s| s.state == MigrationState::Pending)
            .count();
        Self {
            migrations: statuses.into_iter().map(MigrationStatusDto::from).collect(),
            pending,
        }
    }
}
