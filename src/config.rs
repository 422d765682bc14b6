//! Service configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Parsing goes through a lookup function
//! so the same code path can be driven from a map in tests.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::StoreError;

/// Connection cluster settings: one primary, zero or more replicas.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Primary (writable) connection string. Required.
    pub primary_dsn: String,

    /// Read replica connection strings, in configuration order.
    pub replica_dsns: Vec<String>,

    /// Schema used to qualify every table name.
    pub schema: String,

    /// Maximum number of connections per pool.
    pub max_connections: u32,

    /// Minimum number of connections kept open per pool.
    pub min_connections: u32,

    /// Connections older than this are closed and replaced.
    pub max_connection_lifetime: Duration,

    /// Idle connections older than this are closed.
    pub max_idle_time: Duration,

    /// Period of the background pool health probe.
    pub health_check_period: Duration,

    /// Timeout for acquiring a connection from a pool.
    pub connect_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            primary_dsn: String::new(),
            replica_dsns: Vec::new(),
            schema: DEFAULT_SCHEMA.to_string(),
            max_connections: 20,
            min_connections: 5,
            max_connection_lifetime: Duration::from_secs(60 * 60),
            max_idle_time: Duration::from_secs(30 * 60),
            health_check_period: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Thresholds for one batching telemetry writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    /// Buffer length that triggers an immediate flush.
    pub batch_size: usize,
    /// Period of the background flush.
    pub flush_interval: Duration,
}

impl WriterConfig {
    /// Creates a writer configuration. A zero batch size is treated as one.
    #[must_use]
    pub fn new(batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            flush_interval,
        }
    }
}

/// Top-level service configuration.
///
/// Loaded once at startup via [`AppConfig::from_env`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Socket address for the health surface.
    pub listen_addr: SocketAddr,

    /// Database cluster settings.
    pub cluster: ClusterConfig,

    /// Whether pending migrations are applied at startup.
    pub auto_migrate: bool,

    /// Usage-stats writer thresholds.
    pub usage_writer: WriterConfig,

    /// Request-log writer thresholds.
    pub request_log_writer: WriterConfig,

    /// Request logs older than this many days are deleted (0 = never).
    pub request_log_retention_days: u64,
}

/// Schema used when `DATABASE_SCHEMA` is unset or blank.
pub const DEFAULT_SCHEMA: &str = "public";

impl AppConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if `LISTEN_ADDR` is set but
    /// cannot be parsed as a [`SocketAddr`].
    pub fn from_env() -> Result<Self, StoreError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// A missing `DATABASE_URL` is not rejected here; the cluster refuses
    /// to start without it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if `LISTEN_ADDR` is set but
    /// cannot be parsed as a [`SocketAddr`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = lookup("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:8318".to_string());
        let listen_addr: SocketAddr = listen_addr
            .parse()
            .map_err(|e| StoreError::InvalidConfig(format!("LISTEN_ADDR {listen_addr}: {e}")))?;

        let defaults = ClusterConfig::default();
        let cluster = ClusterConfig {
            primary_dsn: lookup("DATABASE_URL")
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
            replica_dsns: split_list(lookup("DATABASE_REPLICA_URLS").as_deref()),
            schema: lookup("DATABASE_SCHEMA")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.schema),
            max_connections: parse_with(&lookup, "DATABASE_MAX_CONNS", defaults.max_connections),
            min_connections: parse_with(&lookup, "DATABASE_MIN_CONNS", defaults.min_connections),
            max_connection_lifetime: parse_secs(
                &lookup,
                "DATABASE_MAX_CONN_LIFETIME_SECS",
                defaults.max_connection_lifetime,
            ),
            max_idle_time: parse_secs(
                &lookup,
                "DATABASE_MAX_CONN_IDLE_TIME_SECS",
                defaults.max_idle_time,
            ),
            health_check_period: parse_secs(
                &lookup,
                "DATABASE_HEALTH_CHECK_PERIOD_SECS",
                defaults.health_check_period,
            ),
            connect_timeout: parse_secs(
                &lookup,
                "DATABASE_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            ),
        };

        let usage_writer = WriterConfig::new(
            parse_with(&lookup, "USAGE_BATCH_SIZE", 100),
            parse_secs(&lookup, "USAGE_FLUSH_INTERVAL_SECS", Duration::from_secs(10)),
        );
        let request_log_writer = WriterConfig::new(
            parse_with(&lookup, "REQUEST_LOG_BATCH_SIZE", 200),
            parse_secs(
                &lookup,
                "REQUEST_LOG_FLUSH_INTERVAL_SECS",
                Duration::from_secs(5),
            ),
        );

        Ok(Self {
            listen_addr,
            cluster,
            auto_migrate: parse_bool_with(&lookup, "DATABASE_AUTO_MIGRATE", true),
            usage_writer,
            request_log_writer,
            request_log_retention_days: parse_with(&lookup, "REQUEST_LOG_RETENTION_DAYS", 30),
        })
    }
}

/// Splits a comma-separated list, dropping blank entries.
fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToString::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Parses a value as `T`, returning `default` on missing or invalid values.
fn parse_with<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses a whole number of seconds.
fn parse_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

/// Parses a boolean. Accepts `"true"`, `"1"`, `"false"`, `"0"`
/// (case-insensitive). Returns `default` otherwise.
fn parse_bool_with<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, StoreError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_documented_pool_tuning() {
        let Ok(config) = load(&[]) else {
            panic!("empty environment should load");
        };
        assert!(config.cluster.primary_dsn.is_empty());
        assert!(config.cluster.replica_dsns.is_empty());
        assert_eq!(config.cluster.schema, "public");
        assert_eq!(config.cluster.max_connections, 20);
        assert_eq!(config.cluster.min_connections, 5);
        assert_eq!(config.cluster.max_connection_lifetime, Duration::from_secs(3600));
        assert_eq!(config.cluster.max_idle_time, Duration::from_secs(1800));
        assert_eq!(config.cluster.health_check_period, Duration::from_secs(60));
        assert!(config.auto_migrate);
    }

    #[test]
    fn replica_list_skips_blank_entries() {
        let Ok(config) = load(&[(
            "DATABASE_REPLICA_URLS",
            "postgres://r1/db, ,postgres://r2/db,",
        )]) else {
            panic!("config should load");
        };
        assert_eq!(
            config.cluster.replica_dsns,
            vec!["postgres://r1/db".to_string(), "postgres://r2/db".to_string()]
        );
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let Ok(config) = load(&[
            ("DATABASE_MAX_CONNS", "lots"),
            ("DATABASE_MIN_CONNS", "7"),
            ("USAGE_BATCH_SIZE", "0"),
        ]) else {
            panic!("config should load");
        };
        assert_eq!(config.cluster.max_connections, 20);
        assert_eq!(config.cluster.min_connections, 7);
        assert_eq!(config.usage_writer.batch_size, 1);
    }

    #[test]
    fn booleans_are_case_insensitive() {
        let Ok(config) = load(&[("DATABASE_AUTO_MIGRATE", "FALSE")]) else {
            panic!("config should load");
        };
        assert!(!config.auto_migrate);
    }

    #[test]
    fn invalid_listen_addr_is_rejected() {
        let result = load(&[("LISTEN_ADDR", "not-an-addr")]);
        assert!(matches!(result, Err(StoreError::InvalidConfig(_))));
    }

    #[test]
    fn blank_schema_uses_default() {
        let Ok(config) = load(&[("DATABASE_SCHEMA", "  ")]) else {
            panic!("config should load");
        };
        assert_eq!(config.cluster.schema, DEFAULT_SCHEMA);
    }
}
