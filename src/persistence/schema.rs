//! Built-in migrations: the six tables of the persistence layer.
//!
//! Every statement uses schema-qualified, quoted table names produced by
//! [`full_table_name`], so the same list works for any configured schema.

use crate::persistence::cluster::full_table_name;
use crate::persistence::migrations::{Migration, MigrationManager};

/// Unqualified table names.
pub mod tables {
    /// OAuth token store.
    pub const OAUTH_TOKENS: &str = "oauth_tokens";
    /// Daily usage aggregate.
    pub const USAGE_STATS: &str = "usage_stats";
    /// Hashed API keys.
    pub const API_KEYS: &str = "api_keys";
    /// Versioned YAML configs.
    pub const CONFIGS: &str = "configs";
    /// Expiring cache.
    pub const CACHE_ENTRIES: &str = "cache_entries";
    /// Append-only request log.
    pub const REQUEST_LOGS: &str = "request_logs";
}

/// Returns a manager with every built-in migration registered for `schema`.
#[must_use]
pub fn migration_manager(schema: &str) -> MigrationManager {
    builtin_migrations(schema)
        .into_iter()
        .fold(MigrationManager::new(schema), MigrationManager::with)
}

/// The built-in migrations, in application order.
#[must_use]
pub fn builtin_migrations(schema: &str) -> Vec<Migration> {
    let tokens = full_table_name(schema, tables::OAUTH_TOKENS);
    let usage = full_table_name(schema, tables::USAGE_STATS);
    let keys = full_table_name(schema, tables::API_KEYS);
    let configs = full_table_name(schema, tables::CONFIGS);
    let cache = full_table_name(schema, tables::CACHE_ENTRIES);
    let logs = full_table_name(schema, tables::REQUEST_LOGS);

    vec![
        Migration::new(
            "001",
            "create_oauth_tokens",
            format!(
                "CREATE TABLE IF NOT EXISTS {tokens} (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    provider TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    email TEXT,
                    access_token TEXT NOT NULL,
                    refresh_token TEXT,
                    token_type TEXT NOT NULL DEFAULT 'Bearer',
                    expires_at TIMESTAMPTZ,
                    scopes TEXT[] NOT NULL DEFAULT '{{}}',
                    metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    last_used_at TIMESTAMPTZ,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    deleted_at TIMESTAMPTZ
                );
                CREATE UNIQUE INDEX IF NOT EXISTS oauth_tokens_live_key
                    ON {tokens} (provider, user_id) WHERE deleted_at IS NULL;
                CREATE INDEX IF NOT EXISTS oauth_tokens_provider_created
                    ON {tokens} (provider, created_at DESC);"
            ),
            format!("DROP TABLE IF EXISTS {tokens};"),
        ),
        Migration::new(
            "002",
            "create_usage_stats",
            format!(
                "CREATE TABLE IF NOT EXISTS {usage} (
                    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
                    provider TEXT NOT NULL,
                    model TEXT NOT NULL,
                    auth_id TEXT NOT NULL,
                    date DATE NOT NULL,
                    request_count BIGINT NOT NULL DEFAULT 0,
                    input_tokens BIGINT NOT NULL DEFAULT 0,
                    output_tokens BIGINT NOT NULL DEFAULT 0,
                    reasoning_tokens BIGINT NOT NULL DEFAULT 0,
                    cached_tokens BIGINT NOT NULL DEFAULT 0,
                    total_tokens BIGINT GENERATED ALWAYS AS
                        (input_tokens + output_tokens + reasoning_tokens + cached_tokens) STORED,
                    success_count BIGINT NOT NULL DEFAULT 0,
                    error_count BIGINT NOT NULL DEFAULT 0,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    CONSTRAINT usage_stats_key UNIQUE (provider, model, auth_id, date)
                );
                CREATE INDEX IF NOT EXISTS usage_stats_date ON {usage} (date);"
            ),
            format!("DROP TABLE IF EXISTS {usage};"),
        ),
        Migration::new(
            "003",
            "create_api_keys",
            format!(
                "CREATE TABLE IF NOT EXISTS {keys} (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    name TEXT NOT NULL,
                    key_hash TEXT NOT NULL UNIQUE,
                    key_prefix TEXT NOT NULL,
                    rate_limit INTEGER NOT NULL DEFAULT 60,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    expires_at TIMESTAMPTZ,
                    last_used_at TIMESTAMPTZ,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    deleted_at TIMESTAMPTZ
                );"
            ),
            format!("DROP TABLE IF EXISTS {keys};"),
        ),
        Migration::new(
            "004",
            "create_configs",
            format!(
                "CREATE TABLE IF NOT EXISTS {configs} (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    name TEXT NOT NULL UNIQUE,
                    content TEXT NOT NULL,
                    version INTEGER NOT NULL DEFAULT 1,
                    is_active BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );"
            ),
            format!("DROP TABLE IF EXISTS {configs};"),
        ),
        Migration::new(
            "005",
            "create_cache_entries",
            format!(
                "CREATE TABLE IF NOT EXISTS {cache} (
                    key TEXT PRIMARY KEY,
                    value BYTEA NOT NULL,
                    content_type TEXT NOT NULL DEFAULT 'application/octet-stream',
                    tags TEXT[] NOT NULL DEFAULT '{{}}',
                    expires_at TIMESTAMPTZ NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );
                CREATE INDEX IF NOT EXISTS cache_entries_tags ON {cache} USING GIN (tags);
                CREATE INDEX IF NOT EXISTS cache_entries_expires ON {cache} (expires_at);"
            ),
            format!("DROP TABLE IF EXISTS {cache};"),
        ),
        Migration::new(
            "006",
            "create_request_logs",
            format!(
                "CREATE TABLE IF NOT EXISTS {logs} (
                    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
                    request_id TEXT NOT NULL,
                    provider TEXT NOT NULL,
                    model TEXT NOT NULL,
                    auth_id TEXT NOT NULL,
                    api_key_id UUID,
                    client_ip TEXT,
                    user_agent TEXT,
                    method TEXT NOT NULL,
                    path TEXT NOT NULL,
                    status_code INTEGER NOT NULL,
                    latency_ms BIGINT NOT NULL,
                    input_tokens BIGINT NOT NULL DEFAULT 0,
                    output_tokens BIGINT NOT NULL DEFAULT 0,
                    error TEXT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );
                CREATE INDEX IF NOT EXISTS request_logs_created ON {logs} (created_at);
                CREATE INDEX IF NOT EXISTS request_logs_provider_model
                    ON {logs} (provider, model, created_at);"
            ),
            format!("DROP TABLE IF EXISTS {logs};"),
        ),
    ]
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn six_tables_in_fixed_width_order() {
        let migrations = builtin_migrations("public");
        let versions: Vec<&str> = migrations.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, vec!["001", "002", "003", "004", "005", "006"]);
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn every_builtin_migration_is_reversible() {
        assert!(builtin_migrations("public").iter().all(|m| m.down.is_some()));
    }

    #[test]
    fn ddl_uses_qualified_names() {
        let migrations = builtin_migrations("relay");
        assert!(
            migrations
                .iter()
                .all(|m| m.up.contains("\"relay\".") && m.up.contains("CREATE TABLE IF NOT EXISTS"))
        );
    }

    #[test]
    fn usage_total_is_a_generated_column() {
        let migrations = builtin_migrations("public");
        let Some(usage) = migrations.iter().find(|m| m.name == "create_usage_stats") else {
            panic!("usage migration missing");
        };
        assert!(usage.up.contains("total_tokens BIGINT GENERATED ALWAYS AS"));
        assert!(usage.up.contains("UNIQUE (provider, model, auth_id, date)"));
    }

    #[test]
    fn manager_registers_all_builtins() {
        assert_eq!(migration_manager("public").migrations().len(), 6);
    }
}
