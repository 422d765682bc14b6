//! Prepared query set: per-entity SQL built once, executed per call.
//!
//! [`Statements`] renders every statement against the cluster's qualified
//! table names at construction. [`QuerySet`] binds parameters and runs them,
//! writes on the primary pool and lookups on a replica.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::analytics::AnalyticsStatements;
use super::cluster::{Cluster, full_table_name};
use super::models::{
    ApiKey, CacheEntry, ConfigEntry, NewApiKey, OAuthToken, OAuthTokenUpsert, Provider,
    RequestLog, RequestLogEntry, UsageKey, UsageRecord, UsageStats,
};
use super::schema::tables;
use crate::error::StoreError;

/// Marker every generated API key starts with.
pub const API_KEY_MARKER: &str = "rk_";

/// Number of plaintext characters kept for display.
pub const API_KEY_PREFIX_LEN: usize = 12;

pub(crate) const TOKEN_COLUMNS: &str = "id, provider, user_id, email, access_token, refresh_token, \
     token_type, expires_at, scopes, metadata, is_active, last_used_at, created_at, updated_at, \
     deleted_at";

pub(crate) const USAGE_COLUMNS: &str = "id, provider, model, auth_id, date, request_count, \
     input_tokens, output_tokens, reasoning_tokens, cached_tokens, total_tokens, success_count, \
     error_count, created_at, updated_at";

/// Writable usage columns, in bind order.
pub(crate) const USAGE_INSERT_COLUMNS: &str = "provider, model, auth_id, date, request_count, \
     input_tokens, output_tokens, reasoning_tokens, cached_tokens, success_count, error_count";

pub(crate) const API_KEY_COLUMNS: &str = "id, name, key_hash, key_prefix, rate_limit, is_active, \
     expires_at, last_used_at, created_at, updated_at, deleted_at";

pub(crate) const CONFIG_COLUMNS: &str =
    "id, name, content, version, is_active, created_at, updated_at";

pub(crate) const CACHE_COLUMNS: &str =
    "key, value, content_type, tags, expires_at, created_at, updated_at";

/// Writable request-log columns, in bind order.
pub(crate) const REQUEST_LOG_INSERT_COLUMNS: &str = "request_id, provider, model, auth_id, \
     api_key_id, client_ip, user_agent, method, path, status_code, latency_ms, input_tokens, \
     output_tokens, error, created_at";

pub(crate) const REQUEST_LOG_COLUMNS: &str = "id, request_id, provider, model, auth_id, \
     api_key_id, client_ip, user_agent, method, path, status_code, latency_ms, input_tokens, \
     output_tokens, error, created_at";

/// SQL text for every single-row operation.
#[derive(Debug, Clone)]
pub struct Statements {
    pub(crate) token_upsert: String,
    pub(crate) token_get: String,
    pub(crate) token_list: String,
    pub(crate) token_touch: String,
    pub(crate) token_delete: String,

    /// `INSERT INTO usage AS t (...)`, shared with the batch path.
    pub(crate) usage_insert_head: String,
    /// Additive-merge conflict clause, shared with the batch path.
    pub(crate) usage_merge: String,
    pub(crate) usage_upsert: String,
    pub(crate) usage_get: String,

    pub(crate) api_key_insert: String,
    pub(crate) api_key_by_hash: String,
    pub(crate) api_key_touch: String,
    pub(crate) api_key_revoke: String,
    pub(crate) api_key_list: String,

    pub(crate) config_upsert: String,
    pub(crate) config_active: String,
    pub(crate) config_get: String,
    pub(crate) config_set_active: String,

    pub(crate) cache_get: String,
    pub(crate) cache_set: String,
    pub(crate) cache_delete: String,
    pub(crate) cache_delete_tag: String,
    pub(crate) cache_purge: String,

    /// `INSERT INTO request_logs (...)`, shared with the batch path.
    pub(crate) request_log_insert_head: String,
    pub(crate) request_log_insert: String,
    pub(crate) request_log_recent: String,
    pub(crate) request_log_delete_before: String,

    pub(crate) analytics: AnalyticsStatements,
}

impl Statements {
    /// Renders every statement against `schema`.
    #[must_use]
    pub fn for_schema(schema: &str) -> Self {
        let tokens = full_table_name(schema, tables::OAUTH_TOKENS);
        let usage = full_table_name(schema, tables::USAGE_STATS);
        let keys = full_table_name(schema, tables::API_KEYS);
        let configs = full_table_name(schema, tables::CONFIGS);
        let cache = full_table_name(schema, tables::CACHE_ENTRIES);
        let logs = full_table_name(schema, tables::REQUEST_LOGS);

        let usage_insert_head = format!("INSERT INTO {usage} AS t ({USAGE_INSERT_COLUMNS})");
        let usage_merge = "ON CONFLICT (provider, model, auth_id, date) DO UPDATE SET \
             request_count = t.request_count + EXCLUDED.request_count, \
             input_tokens = t.input_tokens + EXCLUDED.input_tokens, \
             output_tokens = t.output_tokens + EXCLUDED.output_tokens, \
             reasoning_tokens = t.reasoning_tokens + EXCLUDED.reasoning_tokens, \
             cached_tokens = t.cached_tokens + EXCLUDED.cached_tokens, \
             success_count = t.success_count + EXCLUDED.success_count, \
             error_count = t.error_count + EXCLUDED.error_count, \
             updated_at = NOW()"
            .to_string();
        let request_log_insert_head = format!("INSERT INTO {logs} ({REQUEST_LOG_INSERT_COLUMNS})");

        Self {
            token_upsert: format!(
                "INSERT INTO {tokens} AS t (provider, user_id, email, access_token, refresh_token, \
                 token_type, expires_at, scopes, metadata) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (provider, user_id) WHERE deleted_at IS NULL DO UPDATE SET \
                 email = COALESCE(EXCLUDED.email, t.email), \
                 access_token = EXCLUDED.access_token, \
                 refresh_token = COALESCE(EXCLUDED.refresh_token, t.refresh_token), \
                 token_type = EXCLUDED.token_type, \
                 expires_at = EXCLUDED.expires_at, \
                 scopes = EXCLUDED.scopes, \
                 metadata = EXCLUDED.metadata, \
                 is_active = TRUE, \
                 updated_at = NOW() \
                 RETURNING {TOKEN_COLUMNS}"
            ),
            token_get: format!(
                "SELECT {TOKEN_COLUMNS} FROM {tokens} \
                 WHERE provider = $1 AND user_id = $2 AND is_active AND deleted_at IS NULL \
                 ORDER BY created_at DESC LIMIT 1"
            ),
            token_list: format!(
                "SELECT {TOKEN_COLUMNS} FROM {tokens} \
                 WHERE provider = $1 AND is_active AND deleted_at IS NULL \
                 ORDER BY created_at DESC"
            ),
            token_touch: format!("UPDATE {tokens} SET last_used_at = NOW() WHERE id = $1"),
            token_delete: format!(
                "UPDATE {tokens} SET deleted_at = NOW(), is_active = FALSE, updated_at = NOW() \
                 WHERE id = $1 AND deleted_at IS NULL"
            ),

            usage_upsert: format!(
                "{usage_insert_head} VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 {usage_merge} RETURNING {USAGE_COLUMNS}"
            ),
            usage_get: format!(
                "SELECT {USAGE_COLUMNS} FROM {usage} \
                 WHERE provider = $1 AND model = $2 AND auth_id = $3 AND date = $4"
            ),
            usage_insert_head,
            usage_merge,

            api_key_insert: format!(
                "INSERT INTO {keys} (name, key_hash, key_prefix, rate_limit, expires_at) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING {API_KEY_COLUMNS}"
            ),
            api_key_by_hash: format!("SELECT {API_KEY_COLUMNS} FROM {keys} WHERE key_hash = $1"),
            api_key_touch: format!("UPDATE {keys} SET last_used_at = NOW() WHERE id = $1"),
            api_key_revoke: format!(
                "UPDATE {keys} SET deleted_at = NOW(), is_active = FALSE, updated_at = NOW() \
                 WHERE id = $1 AND deleted_at IS NULL"
            ),
            api_key_list: format!(
                "SELECT {API_KEY_COLUMNS} FROM {keys} WHERE deleted_at IS NULL \
                 ORDER BY created_at DESC"
            ),

            config_upsert: format!(
                "INSERT INTO {configs} AS t (name, content, version, is_active) \
                 VALUES ($1, $2, 1, $3) \
                 ON CONFLICT (name) DO UPDATE SET \
                 content = EXCLUDED.content, \
                 is_active = EXCLUDED.is_active, \
                 version = t.version + 1, \
                 updated_at = NOW() \
                 RETURNING {CONFIG_COLUMNS}"
            ),
            config_active: format!(
                "SELECT {CONFIG_COLUMNS} FROM {configs} WHERE name = $1 AND is_active \
                 ORDER BY version DESC LIMIT 1"
            ),
            config_get: format!("SELECT {CONFIG_COLUMNS} FROM {configs} WHERE id = $1"),
            config_set_active: format!(
                "UPDATE {configs} SET is_active = (id = $1), updated_at = NOW() \
                 WHERE name = (SELECT name FROM {configs} WHERE id = $1)"
            ),

            cache_get: format!(
                "SELECT {CACHE_COLUMNS} FROM {cache} WHERE key = $1 AND expires_at > NOW()"
            ),
            cache_set: format!(
                "INSERT INTO {cache} AS t (key, value, content_type, tags, expires_at) \
                 VALUES ($1, $2, $3, $4, NOW() + $5::FLOAT8 * INTERVAL '1 second') \
                 ON CONFLICT (key) DO UPDATE SET \
                 value = EXCLUDED.value, \
                 content_type = EXCLUDED.content_type, \
                 tags = EXCLUDED.tags, \
                 expires_at = EXCLUDED.expires_at, \
                 updated_at = NOW()"
            ),
            cache_delete: format!("DELETE FROM {cache} WHERE key = $1"),
            cache_delete_tag: format!("DELETE FROM {cache} WHERE tags @> ARRAY[$1]::TEXT[]"),
            cache_purge: format!("DELETE FROM {cache} WHERE expires_at <= NOW()"),

            request_log_insert: format!(
                "{request_log_insert_head} VALUES \
                 ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
            ),
            request_log_recent: format!(
                "SELECT {REQUEST_LOG_COLUMNS} FROM {logs} ORDER BY created_at DESC, id DESC LIMIT $1"
            ),
            request_log_delete_before: format!("DELETE FROM {logs} WHERE created_at < $1"),
            request_log_insert_head,

            analytics: AnalyticsStatements::for_schema(schema),
        }
    }
}

/// Hex-encoded SHA-256 of a plaintext API key.
#[must_use]
pub fn hash_api_key(plaintext: &str) -> String {
    format!("{:x}", Sha256::digest(plaintext.as_bytes()))
}

/// Generates a fresh plaintext API key (`rk_` + 64 hex characters).
#[must_use]
pub fn generate_api_key() -> String {
    format!(
        "{API_KEY_MARKER}{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

fn display_prefix(plaintext: &str) -> String {
    plaintext.chars().take(API_KEY_PREFIX_LEN).collect()
}

/// Single-row CRUD and upsert operations over the cluster.
#[derive(Debug, Clone)]
pub struct QuerySet {
    cluster: Arc<Cluster>,
    sql: Arc<Statements>,
}

impl QuerySet {
    /// Renders every statement against the cluster's schema.
    #[must_use]
    pub fn new(cluster: Arc<Cluster>) -> Self {
        let sql = Arc::new(Statements::for_schema(cluster.schema()));
        Self { cluster, sql }
    }

    /// Returns the rendered statements.
    #[must_use]
    pub fn statements(&self) -> &Statements {
        &self.sql
    }

    // -----------------------------
    // OAuth tokens
    // -----------------------------

    /// Inserts or updates the live token for `(provider, user_id)`.
    ///
    /// Access token and expiry always overwrite; a `None` refresh token
    /// keeps the stored one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn upsert_token(&self, token: &OAuthTokenUpsert) -> Result<OAuthToken, StoreError> {
        let row = sqlx::query_as::<_, OAuthToken>(&self.sql.token_upsert)
            .bind(token.provider.as_str())
            .bind(&token.user_id)
            .bind(&token.email)
            .bind(&token.access_token)
            .bind(&token.refresh_token)
            .bind(&token.token_type)
            .bind(token.expires_at)
            .bind(&token.scopes)
            .bind(sqlx::types::Json(&token.metadata))
            .fetch_one(self.cluster.primary())
            .await?;
        Ok(row)
    }

    /// Returns the most recently created active, non-deleted token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TokenNotFound`] if there is none.
    pub async fn get_token(
        &self,
        provider: Provider,
        user_id: &str,
    ) -> Result<OAuthToken, StoreError> {
        sqlx::query_as::<_, OAuthToken>(&self.sql.token_get)
            .bind(provider.as_str())
            .bind(user_id)
            .fetch_optional(self.cluster.replica())
            .await?
            .ok_or(StoreError::TokenNotFound)
    }

    /// Lists the live tokens of a provider, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn list_tokens(&self, provider: Provider) -> Result<Vec<OAuthToken>, StoreError> {
        let rows = sqlx::query_as::<_, OAuthToken>(&self.sql.token_list)
            .bind(provider.as_str())
            .fetch_all(self.cluster.replica())
            .await?;
        Ok(rows)
    }

    /// Records that the token was just used.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn touch_token(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(&self.sql.token_touch)
            .bind(id)
            .execute(self.cluster.primary())
            .await?;
        Ok(())
    }

    /// Soft-deletes a token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TokenNotFound`] if no live token has that id.
    pub async fn delete_token(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(&self.sql.token_delete)
            .bind(id)
            .execute(self.cluster.primary())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::TokenNotFound);
        }
        Ok(())
    }

    // -----------------------------
    // Usage stats
    // -----------------------------

    /// Adds the record's counters onto the row for its key, creating the
    /// row on first write.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn upsert_usage(&self, record: &UsageRecord) -> Result<UsageStats, StoreError> {
        let row = sqlx::query_as::<_, UsageStats>(&self.sql.usage_upsert)
            .bind(record.provider.as_str())
            .bind(&record.model)
            .bind(&record.auth_id)
            .bind(record.date)
            .bind(record.request_count)
            .bind(record.input_tokens)
            .bind(record.output_tokens)
            .bind(record.reasoning_tokens)
            .bind(record.cached_tokens)
            .bind(record.success_count)
            .bind(record.error_count)
            .fetch_one(self.cluster.primary())
            .await?;
        Ok(row)
    }

    /// Looks up the aggregate row for one key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn get_usage(&self, key: &UsageKey) -> Result<Option<UsageStats>, StoreError> {
        let row = sqlx::query_as::<_, UsageStats>(&self.sql.usage_get)
            .bind(key.provider.as_str())
            .bind(&key.model)
            .bind(&key.auth_id)
            .bind(key.date)
            .fetch_optional(self.cluster.replica())
            .await?;
        Ok(row)
    }

    // -----------------------------
    // API keys
    // -----------------------------

    /// Creates a key and returns the plaintext exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn create_api_key(
        &self,
        name: &str,
        rate_limit: i32,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<NewApiKey, StoreError> {
        let plaintext = generate_api_key();
        let key = sqlx::query_as::<_, ApiKey>(&self.sql.api_key_insert)
            .bind(name)
            .bind(hash_api_key(&plaintext))
            .bind(display_prefix(&plaintext))
            .bind(rate_limit)
            .bind(expires_at)
            .fetch_one(self.cluster.primary())
            .await?;
        tracing::info!(key_id = %key.id, prefix = %key.key_prefix, "api key created");
        Ok(NewApiKey { key, plaintext })
    }

    /// Validates a plaintext key by its hash.
    ///
    /// Reads the primary so revocations apply immediately. On success the
    /// last-used timestamp is updated in a detached task; that update may
    /// lag and its failure is only logged.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ApiKeyNotFound`] if no key has that hash.
    /// - [`StoreError::ApiKeyInactive`] if inactive or soft-deleted.
    /// - [`StoreError::ApiKeyExpired`] if past its expiry.
    pub async fn validate_api_key(&self, plaintext: &str) -> Result<ApiKey, StoreError> {
        let key = sqlx::query_as::<_, ApiKey>(&self.sql.api_key_by_hash)
            .bind(hash_api_key(plaintext))
            .fetch_optional(self.cluster.primary())
            .await?
            .ok_or(StoreError::ApiKeyNotFound)?;
        key.ensure_usable(Utc::now())?;

        let pool = self.cluster.primary().clone();
        let sql = Arc::clone(&self.sql);
        let id = key.id;
        tokio::spawn(async move {
            if let Err(err) = sqlx::query(&sql.api_key_touch).bind(id).execute(&pool).await {
                tracing::debug!(key_id = %id, error = %err, "api key last-used update failed");
            }
        });

        Ok(key)
    }

    /// Soft-deletes a key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ApiKeyNotFound`] if no live key has that id.
    pub async fn revoke_api_key(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(&self.sql.api_key_revoke)
            .bind(id)
            .execute(self.cluster.primary())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ApiKeyNotFound);
        }
        tracing::info!(key_id = %id, "api key revoked");
        Ok(())
    }

    /// Lists keys that are not soft-deleted, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn list_api_keys(&self) -> Result<Vec<ApiKey>, StoreError> {
        let rows = sqlx::query_as::<_, ApiKey>(&self.sql.api_key_list)
            .fetch_all(self.cluster.replica())
            .await?;
        Ok(rows)
    }

    // -----------------------------
    // Configs
    // -----------------------------

    /// Writes a config by name. An existing name gets the new content and
    /// flag with its version bumped by one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn upsert_config(
        &self,
        name: &str,
        content: &str,
        is_active: bool,
    ) -> Result<ConfigEntry, StoreError> {
        let row = sqlx::query_as::<_, ConfigEntry>(&self.sql.config_upsert)
            .bind(name)
            .bind(content)
            .bind(is_active)
            .fetch_one(self.cluster.primary())
            .await?;
        Ok(row)
    }

    /// Returns the active version for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoActiveConfig`] if no version is active.
    pub async fn get_active_config(&self, name: &str) -> Result<ConfigEntry, StoreError> {
        sqlx::query_as::<_, ConfigEntry>(&self.sql.config_active)
            .bind(name)
            .fetch_optional(self.cluster.replica())
            .await?
            .ok_or_else(|| StoreError::NoActiveConfig(name.to_string()))
    }

    /// Returns a config row by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConfigNotFound`] if it does not exist.
    pub async fn get_config(&self, id: Uuid) -> Result<ConfigEntry, StoreError> {
        sqlx::query_as::<_, ConfigEntry>(&self.sql.config_get)
            .bind(id)
            .fetch_optional(self.cluster.replica())
            .await?
            .ok_or(StoreError::ConfigNotFound(id))
    }

    /// Activates `id` and deactivates every other row with its name, in
    /// one statement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConfigNotFound`] if `id` does not exist.
    pub async fn set_active_config(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(&self.sql.config_set_active)
            .bind(id)
            .execute(self.cluster.primary())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ConfigNotFound(id));
        }
        Ok(())
    }

    // -----------------------------
    // Cache
    // -----------------------------

    /// Returns an unexpired entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CacheMiss`] if absent or expired.
    pub async fn cache_get(&self, key: &str) -> Result<CacheEntry, StoreError> {
        sqlx::query_as::<_, CacheEntry>(&self.sql.cache_get)
            .bind(key)
            .fetch_optional(self.cluster.replica())
            .await?
            .ok_or(StoreError::CacheMiss)
    }

    /// Stores `value` under `key`, overwriting everything about an
    /// existing entry. Expiry is computed on the database clock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn cache_set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
        content_type: &str,
        tags: &[String],
    ) -> Result<(), StoreError> {
        sqlx::query(&self.sql.cache_set)
            .bind(key)
            .bind(value)
            .bind(content_type)
            .bind(tags)
            .bind(ttl.as_secs_f64())
            .execute(self.cluster.primary())
            .await?;
        Ok(())
    }

    /// Deletes one entry. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn cache_delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(&self.sql.cache_delete)
            .bind(key)
            .execute(self.cluster.primary())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes every entry tagged with `tag`. Returns the count removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn cache_delete_by_tag(&self, tag: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(&self.sql.cache_delete_tag)
            .bind(tag)
            .execute(self.cluster.primary())
            .await?;
        Ok(result.rows_affected())
    }

    /// Physically removes expired entries. Returns the count removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn cache_purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(&self.sql.cache_purge)
            .execute(self.cluster.primary())
            .await?;
        Ok(result.rows_affected())
    }

    // -----------------------------
    // Request log
    // -----------------------------

    /// Appends one request-log row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn insert_request_log(&self, entry: &RequestLogEntry) -> Result<(), StoreError> {
        sqlx::query(&self.sql.request_log_insert)
            .bind(&entry.request_id)
            .bind(entry.provider.as_str())
            .bind(&entry.model)
            .bind(&entry.auth_id)
            .bind(entry.api_key_id)
            .bind(&entry.client_ip)
            .bind(&entry.user_agent)
            .bind(&entry.method)
            .bind(&entry.path)
            .bind(entry.status_code)
            .bind(entry.latency_ms)
            .bind(entry.input_tokens)
            .bind(entry.output_tokens)
            .bind(&entry.error)
            .bind(entry.created_at)
            .execute(self.cluster.primary())
            .await?;
        Ok(())
    }

    /// Returns the newest request-log rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn recent_request_logs(&self, limit: i64) -> Result<Vec<RequestLog>, StoreError> {
        let rows = sqlx::query_as::<_, RequestLog>(&self.sql.request_log_recent)
            .bind(limit.max(0))
            .fetch_all(self.cluster.replica())
            .await?;
        Ok(rows)
    }

    /// Deletes request-log rows older than `cutoff`. Returns the count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on database failure.
    pub async fn delete_request_logs_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(&self.sql.request_log_delete_before)
            .bind(cutoff)
            .execute(self.cluster.primary())
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_upsert_adds_every_counter() {
        let sql = Statements::for_schema("public");
        for column in [
            "request_count",
            "input_tokens",
            "output_tokens",
            "reasoning_tokens",
            "cached_tokens",
            "success_count",
            "error_count",
        ] {
            let additive = format!("{column} = t.{column} + EXCLUDED.{column}");
            assert!(sql.usage_upsert.contains(&additive), "{column} must be additive");
        }
        assert!(!sql.usage_upsert.contains("total_tokens = "));
        assert!(sql.usage_upsert.contains("ON CONFLICT (provider, model, auth_id, date)"));
    }

    #[test]
    fn token_upsert_preserves_refresh_token() {
        let sql = Statements::for_schema("public");
        assert!(
            sql.token_upsert
                .contains("refresh_token = COALESCE(EXCLUDED.refresh_token, t.refresh_token)")
        );
        assert!(sql.token_upsert.contains("access_token = EXCLUDED.access_token"));
        assert!(sql.token_upsert.contains("expires_at = EXCLUDED.expires_at"));
    }

    #[test]
    fn config_upsert_bumps_version_by_one() {
        let sql = Statements::for_schema("public");
        assert!(sql.config_upsert.contains("version = t.version + 1"));
        assert!(sql.config_set_active.contains("is_active = (id = $1)"));
    }

    #[test]
    fn lookups_hide_expired_and_deleted_rows() {
        let sql = Statements::for_schema("public");
        assert!(sql.cache_get.contains("expires_at > NOW()"));
        assert!(sql.token_get.contains("deleted_at IS NULL"));
        assert!(sql.token_get.contains("ORDER BY created_at DESC LIMIT 1"));
    }

    #[test]
    fn statements_use_qualified_tables() {
        let sql = Statements::for_schema("tenant\"a");
        assert!(sql.usage_upsert.contains("\"tenant\"\"a\".\"usage_stats\""));
        assert!(sql.request_log_insert.contains("\"tenant\"\"a\".\"request_logs\""));
    }

    #[test]
    fn api_key_hash_is_sha256_hex() {
        let hash = hash_api_key("rk_example");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_api_key("rk_example"));
        assert_ne!(hash, hash_api_key("rk_other"));
    }

    #[test]
    fn generated_keys_are_unique_and_prefixed() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a, b);
        assert!(a.starts_with(API_KEY_MARKER));
        assert_eq!(a.len(), API_KEY_MARKER.len() + 64);
        assert_eq!(display_prefix(&a).len(), API_KEY_PREFIX_LEN);
    }
}
