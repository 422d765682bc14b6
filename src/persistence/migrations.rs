//! Versioned schema migrations with a durable applied-record table.
//!
//! Migrations are registered in order. Versions are fixed-width digit
//! strings (`"001"`, `"002"`, ...) and compare lexicographically; a wider
//! version would sort incorrectly, so registration logs a warning whenever
//! a version does not sort after its predecessor.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};

use crate::error::StoreError;
use crate::persistence::cluster::{full_table_name, quote_identifier};

/// Name of the tracking table inside the cluster schema.
pub const TRACKING_TABLE: &str = "schema_migrations";

/// One named, versioned schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Fixed-width version string.
    pub version: String,
    /// Human-readable name.
    pub name: String,
    /// Forward SQL; may contain several statements.
    pub up: String,
    /// Reverse SQL; `None` marks the migration irreversible.
    pub down: Option<String>,
}

impl Migration {
    /// Creates a reversible migration.
    #[must_use]
    pub fn new(version: &str, name: &str, up: impl Into<String>, down: impl Into<String>) -> Self {
        Self {
            version: version.to_string(),
            name: name.to_string(),
            up: up.into(),
            down: Some(down.into()),
        }
    }

    /// Creates a migration that cannot be rolled back.
    #[must_use]
    pub fn irreversible(version: &str, name: &str, up: impl Into<String>) -> Self {
        Self {
            version: version.to_string(),
            name: name.to_string(),
            up: up.into(),
            down: None,
        }
    }
}

/// Whether a registered migration has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// Present in the tracking table.
    Applied,
    /// Registered but not yet applied.
    Pending,
}

/// Status line for one registered migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Migration version.
    pub version: String,
    /// Migration name.
    pub name: String,
    /// Applied or pending.
    pub state: MigrationState,
    /// When it was applied, if it was.
    pub applied_at: Option<DateTime<Utc>>,
}

/// Ordered migration registry plus the SQL for its tracking table.
#[derive(Debug, Clone)]
pub struct MigrationManager {
    schema: String,
    table: String,
    migrations: Vec<Migration>,
}

impl MigrationManager {
    /// Creates an empty manager tracking into `"schema"."schema_migrations"`.
    #[must_use]
    pub fn new(schema: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: full_table_name(schema, TRACKING_TABLE),
            migrations: Vec::new(),
        }
    }

    /// Appends a migration to the registration order.
    pub fn register(&mut self, migration: Migration) {
        if let Some(previous) = self.migrations.last()
            && previous.version.as_str() >= migration.version.as_str()
        {
            tracing::warn!(
                previous = %previous.version,
                version = %migration.version,
                "migration version does not sort after its predecessor"
            );
        }
        self.migrations.push(migration);
    }

    /// Builder form of [`MigrationManager::register`].
    #[must_use]
    pub fn with(mut self, migration: Migration) -> Self {
        self.register(migration);
        self
    }

    /// Returns every registered migration in registration order.
    #[must_use]
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Returns the qualified tracking table name.
    #[must_use]
    pub fn tracking_table(&self) -> &str {
        &self.table
    }

    /// Creates the schema and tracking table if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn initialize(&self, pool: &PgPool) -> Result<(), StoreError> {
        let ddl = format!(
            "CREATE SCHEMA IF NOT EXISTS {schema};
             CREATE TABLE IF NOT EXISTS {table} (
                 version TEXT PRIMARY KEY,
                 name TEXT NOT NULL,
                 applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
             );",
            schema = quote_identifier(&self.schema),
            table = self.table,
        );
        sqlx::raw_sql(&ddl).execute(pool).await?;
        Ok(())
    }

    /// Whether the tracking table exists. Issues no DDL.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn is_initialized(&self, pool: &PgPool) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
            .bind(&self.table)
            .fetch_one(pool)
            .await?;
        Ok(exists)
    }

    /// Loads the applied record: version → applied timestamp.
    ///
    /// A missing tracking table reads as an empty record, so every
    /// migration reports pending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn applied(&self, pool: &PgPool) -> Result<HashMap<String, DateTime<Utc>>, StoreError> {
        if !self.is_initialized(pool).await? {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, (String, DateTime<Utc>)>(&format!(
            "SELECT version, applied_at FROM {} ORDER BY version",
            self.table
        ))
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Registered migrations not yet applied, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn pending(&self, pool: &PgPool) -> Result<Vec<&Migration>, StoreError> {
        let applied = self.applied(pool).await?;
        Ok(self.pending_given(&applied))
    }

    /// Applies every pending migration inside one transaction.
    ///
    /// Either all pending migrations are applied and recorded, or none is.
    /// Returns the versions applied.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if any migration fails; the whole
    /// batch is rolled back.
    pub async fn up(&self, pool: &PgPool) -> Result<Vec<String>, StoreError> {
        let pending = self.pending(pool).await?;
        if pending.is_empty() {
            tracing::debug!("schema is up to date");
            return Ok(Vec::new());
        }

        let mut tx = pool.begin().await?;
        let outcome = self.apply_all(&mut *tx, &pending).await;
        match outcome {
            Ok(()) => tx.commit().await?,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "migration rollback failed");
                }
                return Err(err);
            }
        }

        let versions: Vec<String> = pending.iter().map(|m| m.version.clone()).collect();
        for migration in &pending {
            tracing::info!(version = %migration.version, name = %migration.name, "migration applied");
        }
        Ok(versions)
    }

    /// Rolls back the most recently applied migration.
    ///
    /// The target is the last registered migration that is not pending.
    /// Its reverse SQL runs and its tracking row is deleted in one
    /// transaction. Returns the version rolled back.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NothingToRollback`] if nothing is applied.
    /// - [`StoreError::IrreversibleMigration`] if it has no reverse SQL.
    /// - [`StoreError::Database`] on database failure.
    pub async fn down(&self, pool: &PgPool) -> Result<String, StoreError> {
        let applied = self.applied(pool).await?;
        let migration = self
            .last_applied_given(&applied)
            .ok_or(StoreError::NothingToRollback)?;
        let reverse = migration
            .down
            .as_deref()
            .ok_or_else(|| StoreError::IrreversibleMigration {
                version: migration.version.clone(),
            })?;

        let mut tx = pool.begin().await?;
        let outcome = self.revert(&mut *tx, migration, reverse).await;
        match outcome {
            Ok(()) => tx.commit().await?,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "migration rollback failed");
                }
                return Err(err);
            }
        }

        tracing::info!(version = %migration.version, name = %migration.name, "migration rolled back");
        Ok(migration.version.clone())
    }

    /// Every registered migration tagged applied or pending, in
    /// registration order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn status(&self, pool: &PgPool) -> Result<Vec<MigrationStatus>, StoreError> {
        let applied = self.applied(pool).await?;
        Ok(self.status_given(&applied))
    }

    async fn apply_all(
        &self,
        conn: &mut PgConnection,
        pending: &[&Migration],
    ) -> Result<(), StoreError> {
        let record = format!("INSERT INTO {} (version, name) VALUES ($1, $2)", self.table);
        for migration in pending {
            sqlx::raw_sql(&migration.up).execute(&mut *conn).await?;
            sqlx::query(&record)
                .bind(&migration.version)
                .bind(&migration.name)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    async fn revert(
        &self,
        conn: &mut PgConnection,
        migration: &Migration,
        reverse: &str,
    ) -> Result<(), StoreError> {
        sqlx::raw_sql(reverse).execute(&mut *conn).await?;
        sqlx::query(&format!("DELETE FROM {} WHERE version = $1", self.table))
            .bind(&migration.version)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    fn pending_given(&self, applied: &HashMap<String, DateTime<Utc>>) -> Vec<&Migration> {
        self.migrations
            .iter()
            .filter(|m| !applied.contains_key(&m.version))
            .collect()
    }

    fn last_applied_given(&self, applied: &HashMap<String, DateTime<Utc>>) -> Option<&Migration> {
        self.migrations
            .iter()
            .rev()
            .find(|m| applied.contains_key(&m.version))
    }

    fn status_given(&self, applied: &HashMap<String, DateTime<Utc>>) -> Vec<MigrationStatus> {
        self.migrations
            .iter()
            .map(|m| {
                let applied_at = applied.get(&m.version).copied();
                MigrationStatus {
                    version: m.version.clone(),
                    name: m.name.clone(),
                    state: if applied_at.is_some() {
                        MigrationState::Applied
                    } else {
                        MigrationState::Pending
                    },
                    applied_at,
                }
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn manager() -> MigrationManager {
        MigrationManager::new("relay")
            .with(Migration::new("001", "first", "SELECT 1", "SELECT 1"))
            .with(Migration::new("002", "second", "SELECT 2", "SELECT 2"))
            .with(Migration::irreversible("003", "third", "SELECT 3"))
    }

    fn applied(versions: &[&str]) -> HashMap<String, DateTime<Utc>> {
        versions
            .iter()
            .map(|v| ((*v).to_string(), Utc::now()))
            .collect()
    }

    #[test]
    fn tracking_table_is_qualified() {
        assert_eq!(
            manager().tracking_table(),
            "\"relay\".\"schema_migrations\""
        );
    }

    #[test]
    fn pending_preserves_registration_order() {
        let m = manager();
        let pending: Vec<&str> = m
            .pending_given(&applied(&["002"]))
            .iter()
            .map(|m| m.version.as_str())
            .collect();
        assert_eq!(pending, vec!["001", "003"]);
    }

    #[test]
    fn nothing_pending_when_all_applied() {
        let m = manager();
        assert!(m.pending_given(&applied(&["001", "002", "003"])).is_empty());
    }

    #[test]
    fn status_marks_applied_with_timestamp() {
        let m = manager();
        let status = m.status_given(&applied(&["001", "002", "003"]));
        assert_eq!(status.len(), 3);
        for line in &status {
            assert_eq!(line.state, MigrationState::Applied);
            assert!(line.applied_at.is_some());
        }
        let versions: Vec<&str> = status.iter().map(|s| s.version.as_str()).collect();
        assert_eq!(versions, vec!["001", "002", "003"]);
    }

    #[test]
    fn status_marks_unapplied_as_pending() {
        let m = manager();
        let status = m.status_given(&applied(&["001"]));
        let states: Vec<MigrationState> = status.iter().map(|s| s.state).collect();
        assert_eq!(
            states,
            vec![
                MigrationState::Applied,
                MigrationState::Pending,
                MigrationState::Pending
            ]
        );
    }

    #[test]
    fn last_applied_is_last_registered_not_pending() {
        let m = manager();
        let Some(last) = m.last_applied_given(&applied(&["001", "002"])) else {
            panic!("expected an applied migration");
        };
        assert_eq!(last.version, "002");
        assert!(m.last_applied_given(&applied(&[])).is_none());
    }

    #[test]
    fn fixed_width_versions_sort_lexicographically() {
        assert!("001" < "002");
        assert!("002" < "010");
        // The documented limitation of plain string ordering.
        assert!("1000" < "999");
    }

    #[test]
    fn irreversible_migration_has_no_down() {
        let m = manager();
        let Some(third) = m.migrations().last() else {
            panic!("expected migrations");
        };
        assert!(third.down.is_none());
    }
}
