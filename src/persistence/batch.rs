//! Bulk inserts for the two telemetry tables.
//!
//! Each call renders one multi-row `INSERT` per chunk and runs every chunk
//! inside one transaction on the primary pool. Chunks stay under the
//! protocol limit of 65 535 bind parameters, so a call normally costs a
//! single round trip.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::models::{RequestLogEntry, UsageRecord, merge_usage_records};
use super::queries::Statements;
use super::repository::Repository;
use crate::error::StoreError;
use crate::telemetry::writer::BatchSink;

const MAX_BIND_PARAMS: usize = 65_535;
const USAGE_BINDS_PER_ROW: usize = 11;
const REQUEST_LOG_BINDS_PER_ROW: usize = 15;

/// Rows that fit in one statement when each row binds `binds` parameters.
const fn rows_per_statement(binds: usize) -> usize {
    MAX_BIND_PARAMS / binds
}

/// Bulk-insert view over the primary pool.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pool: &'a PgPool,
    sql: &'a Statements,
}

impl<'a> Batch<'a> {
    pub(crate) const fn new(pool: &'a PgPool, sql: &'a Statements) -> Self {
        Self { pool, sql }
    }

    /// Applies usage records with the same additive merge as the single-row
    /// upsert.
    ///
    /// Records sharing a key are summed in memory first: one statement may
    /// not touch the same row twice. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure; no record of the call
    /// is applied.
    pub async fn upsert_usage(&self, records: &[UsageRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let merged = merge_usage_records(records);

        let mut tx = self.pool.begin().await?;
        let mut written = 0_u64;
        for chunk in merged.chunks(rows_per_statement(USAGE_BINDS_PER_ROW)) {
            let mut builder: QueryBuilder<'_, Postgres> =
                QueryBuilder::new(format!("{} ", self.sql.usage_insert_head));
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.provider.as_str())
                    .push_bind(&record.model)
                    .push_bind(&record.auth_id)
                    .push_bind(record.date)
                    .push_bind(record.request_count)
                    .push_bind(record.input_tokens)
                    .push_bind(record.output_tokens)
                    .push_bind(record.reasoning_tokens)
                    .push_bind(record.cached_tokens)
                    .push_bind(record.success_count)
                    .push_bind(record.error_count);
            });
            builder.push(" ").push(&self.sql.usage_merge);
            let result = builder.build().execute(&mut *tx).await?;
            written = written.saturating_add(result.rows_affected());
        }
        // Dropping `tx` on an early return rolls it back.
        tx.commit().await?;

        tracing::debug!(
            records = records.len(),
            rows = merged.len(),
            "usage batch written"
        );
        Ok(written)
    }

    /// Appends request-log rows. Returns the number inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure; no row of the call is
    /// inserted.
    pub async fn insert_request_logs(&self, entries: &[RequestLogEntry]) -> Result<u64, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0_u64;
        for chunk in entries.chunks(rows_per_statement(REQUEST_LOG_BINDS_PER_ROW)) {
            let mut builder: QueryBuilder<'_, Postgres> =
                QueryBuilder::new(format!("{} ", self.sql.request_log_insert_head));
            builder.push_values(chunk, |mut row, entry| {
                row.push_bind(&entry.request_id)
                    .push_bind(entry.provider.as_str())
                    .push_bind(&entry.model)
                    .push_bind(&entry.auth_id)
                    .push_bind(entry.api_key_id)
                    .push_bind(&entry.client_ip)
                    .push_bind(&entry.user_agent)
                    .push_bind(&entry.method)
                    .push_bind(&entry.path)
                    .push_bind(entry.status_code)
                    .push_bind(entry.latency_ms)
                    .push_bind(entry.input_tokens)
                    .push_bind(entry.output_tokens)
                    .push_bind(&entry.error)
                    .push_bind(entry.created_at);
            });
            let result = builder.build().execute(&mut *tx).await?;
            written = written.saturating_add(result.rows_affected());
        }
        tx.commit().await?;

        tracing::debug!(rows = written, "request log batch written");
        Ok(written)
    }
}

#[async_trait]
impl BatchSink<UsageRecord> for Repository {
    async fn write_batch(&self, records: Vec<UsageRecord>) -> Result<u64, StoreError> {
        self.batch().upsert_usage(&records).await
    }
}

#[async_trait]
impl BatchSink<RequestLogEntry> for Repository {
    async fn write_batch(&self, records: Vec<RequestLogEntry>) -> Result<u64, StoreError> {
        self.batch().insert_request_logs(&records).await
    }
}
