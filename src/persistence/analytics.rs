//! Read-only aggregations over the usage-stats table.
//!
//! All three run on a replica pool and have no write side effects. Date
//! ranges are inclusive on both ends.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::PgPool;

use super::cluster::full_table_name;
use super::models::Provider;
use super::queries::Statements;
use super::schema::tables;
use crate::error::StoreError;

/// Usage totals for one provider/model pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct UsageSummary {
    /// Provider.
    #[sqlx(try_from = "String")]
    pub provider: Provider,
    /// Model name.
    pub model: String,
    /// Requests in range.
    pub request_count: i64,
    /// Prompt tokens in range.
    pub input_tokens: i64,
    /// Completion tokens in range.
    pub output_tokens: i64,
    /// All tokens in range.
    pub total_tokens: i64,
    /// Successful requests.
    pub success_count: i64,
    /// Failed requests.
    pub error_count: i64,
}

/// Usage totals for one auth identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct AuthUsage {
    /// Auth identifier.
    pub auth_id: String,
    /// Requests in range.
    pub request_count: i64,
    /// All tokens in range.
    pub total_tokens: i64,
}

/// Error ratio for one provider/model pair.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ErrorRate {
    /// Provider.
    #[sqlx(try_from = "String")]
    pub provider: Provider,
    /// Model name.
    pub model: String,
    /// Requests in range.
    pub request_count: i64,
    /// Failed requests in range.
    pub error_count: i64,
    /// `error_count / request_count`, or `0` with no requests.
    pub error_rate: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct AnalyticsStatements {
    usage_summary: String,
    top_auth_ids: String,
    error_rates: String,
}

impl AnalyticsStatements {
    pub(crate) fn for_schema(schema: &str) -> Self {
        let usage = full_table_name(schema, tables::USAGE_STATS);
        Self {
            // SUM over BIGINT yields NUMERIC; cast back so rows decode as i64.
            usage_summary: format!(
                "SELECT provider, model, \
                 SUM(request_count)::BIGINT AS request_count, \
                 SUM(input_tokens)::BIGINT AS input_tokens, \
                 SUM(output_tokens)::BIGINT AS output_tokens, \
                 SUM(total_tokens)::BIGINT AS total_tokens, \
                 SUM(success_count)::BIGINT AS success_count, \
                 SUM(error_count)::BIGINT AS error_count \
                 FROM {usage} WHERE date BETWEEN $1 AND $2 \
                 GROUP BY provider, model \
                 ORDER BY total_tokens DESC, provider, model"
            ),
            top_auth_ids: format!(
                "SELECT auth_id, \
                 SUM(request_count)::BIGINT AS request_count, \
                 SUM(total_tokens)::BIGINT AS total_tokens \
                 FROM {usage} WHERE date BETWEEN $1 AND $2 \
                 GROUP BY auth_id \
                 ORDER BY total_tokens DESC, auth_id \
                 LIMIT $3"
            ),
            error_rates: format!(
                "SELECT provider, model, \
                 SUM(request_count)::BIGINT AS request_count, \
                 SUM(error_count)::BIGINT AS error_count, \
                 CASE WHEN SUM(request_count) = 0 THEN 0::FLOAT8 \
                 ELSE SUM(error_count)::FLOAT8 / SUM(request_count)::FLOAT8 END AS error_rate \
                 FROM {usage} WHERE date BETWEEN $1 AND $2 \
                 GROUP BY provider, model \
                 ORDER BY error_rate DESC, provider, model"
            ),
        }
    }
}

/// Aggregation view bound to one replica pool.
#[derive(Debug, Clone, Copy)]
pub struct Analytics<'a> {
    pool: &'a PgPool,
    sql: &'a AnalyticsStatements,
}

impl<'a> Analytics<'a> {
    pub(crate) fn new(pool: &'a PgPool, statements: &'a Statements) -> Self {
        Self {
            pool,
            sql: &statements.analytics,
        }
    }

    /// Totals grouped by provider and model, largest token volume first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn usage_summary(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<UsageSummary>, StoreError> {
        let rows = sqlx::query_as::<_, UsageSummary>(&self.sql.usage_summary)
            .bind(from)
            .bind(to)
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }

    /// The `limit` auth identifiers with the most tokens.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn top_auth_ids(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        limit: i64,
    ) -> Result<Vec<AuthUsage>, StoreError> {
        let rows = sqlx::query_as::<_, AuthUsage>(&self.sql.top_auth_ids)
            .bind(from)
            .bind(to)
            .bind(limit.max(0))
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }

    /// Error ratio grouped by provider and model, worst first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn error_rates(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ErrorRate>, StoreError> {
        let rows = sqlx::query_as::<_, ErrorRate>(&self.sql.error_rates)
            .bind(from)
            .bind(to)
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }
}
