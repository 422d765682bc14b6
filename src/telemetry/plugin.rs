//! Usage-reporting plugin seam and the two writer adapters.
//!
//! The gateway's usage subsystem owns a registry of [`UsagePlugin`]s and
//! hands every finished request to each of them as a [`UsageReport`]. This
//! layer does not own that registry; it only implements plugins and
//! registers them into whatever [`PluginRegistry`] it is given.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::writer::{BatchSink, BatchWriter};
use crate::config::WriterConfig;
use crate::persistence::models::{Provider, RequestLogEntry, UsageRecord};

/// One finished gateway request, as reported by the request pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    /// Gateway-assigned request identifier.
    pub request_id: String,
    /// Provider the request was routed to.
    pub provider: Provider,
    /// Model requested.
    pub model: String,
    /// Auth identifier used upstream.
    pub auth_id: String,
    /// API key the client authenticated with.
    pub api_key_id: Option<Uuid>,
    /// Client address.
    pub client_ip: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Response status code.
    pub status_code: u16,
    /// End-to-end latency.
    pub latency: Duration,
    /// Prompt tokens.
    pub input_tokens: i64,
    /// Completion tokens.
    pub output_tokens: i64,
    /// Reasoning tokens.
    pub reasoning_tokens: i64,
    /// Cached prompt tokens.
    pub cached_tokens: i64,
    /// Error text for failed requests.
    pub error: Option<String>,
    /// When the request was received.
    pub requested_at: DateTime<Utc>,
}

impl UsageReport {
    /// A request failed if it carries an error or a 4xx/5xx status.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.error.is_some() || self.status_code >= 400
    }
}

impl From<&UsageReport> for UsageRecord {
    fn from(report: &UsageReport) -> Self {
        let failed = report.failed();
        Self {
            provider: report.provider,
            model: report.model.clone(),
            auth_id: report.auth_id.clone(),
            date: report.requested_at.date_naive(),
            request_count: 1,
            input_tokens: report.input_tokens,
            output_tokens: report.output_tokens,
            reasoning_tokens: report.reasoning_tokens,
            cached_tokens: report.cached_tokens,
            success_count: i64::from(!failed),
            error_count: i64::from(failed),
        }
    }
}

impl From<&UsageReport> for RequestLogEntry {
    fn from(report: &UsageReport) -> Self {
        Self {
            request_id: report.request_id.clone(),
            provider: report.provider,
            model: report.model.clone(),
            auth_id: report.auth_id.clone(),
            api_key_id: report.api_key_id,
            client_ip: report.client_ip.clone(),
            user_agent: report.user_agent.clone(),
            method: report.method.clone(),
            path: report.path.clone(),
            status_code: i32::from(report.status_code),
            latency_ms: i64::try_from(report.latency.as_millis()).unwrap_or(i64::MAX),
            input_tokens: report.input_tokens,
            output_tokens: report.output_tokens,
            error: report.error.clone(),
            created_at: report.requested_at,
        }
    }
}

/// Receives every finished request. Must not block.
pub trait UsagePlugin: Send + Sync {
    /// Stable plugin name, for logs.
    fn name(&self) -> &str;

    /// Consumes one report.
    fn handle_usage(&self, report: &UsageReport);
}

/// Registry owned by the usage-reporting subsystem.
pub trait PluginRegistry: Send + Sync {
    /// Adds a plugin that receives every later report.
    fn register(&self, plugin: Arc<dyn UsagePlugin>);
}

/// In-process [`PluginRegistry`] that fans reports out to its plugins.
#[derive(Default)]
pub struct PluginSet {
    plugins: RwLock<Vec<Arc<dyn UsagePlugin>>>,
}

impl fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSet")
            .field("plugins", &self.names())
            .finish()
    }
}

impl PluginSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands `report` to every registered plugin, in registration order.
    pub fn dispatch(&self, report: &UsageReport) {
        let plugins = self
            .plugins
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for plugin in plugins.iter() {
            plugin.handle_usage(report);
        }
    }

    /// Names of the registered plugins.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.plugins
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }
}

impl PluginRegistry for PluginSet {
    fn register(&self, plugin: Arc<dyn UsagePlugin>) {
        tracing::info!(plugin = plugin.name(), "usage plugin registered");
        self.plugins
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(plugin);
    }
}

/// Feeds the daily usage aggregate.
#[derive(Debug)]
pub struct UsageStatsWriter {
    inner: BatchWriter<UsageRecord>,
}

impl UsageStatsWriter {
    /// Plugin name.
    pub const NAME: &'static str = "usage-stats";

    /// Starts the background flush task.
    #[must_use]
    pub fn start(sink: Arc<dyn BatchSink<UsageRecord>>, config: WriterConfig) -> Self {
        Self {
            inner: BatchWriter::start(Self::NAME, sink, config),
        }
    }

    /// Registers this writer as a usage plugin.
    pub fn register_into(self: &Arc<Self>, registry: &dyn PluginRegistry) {
        registry.register(Arc::clone(self) as Arc<dyn UsagePlugin>);
    }

    /// The underlying batching writer.
    #[must_use]
    pub fn writer(&self) -> &BatchWriter<UsageRecord> {
        &self.inner
    }

    /// Final flush and stop.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}

impl UsagePlugin for UsageStatsWriter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn handle_usage(&self, report: &UsageReport) {
        self.inner.append(UsageRecord::from(report));
    }
}

/// Feeds the append-only request log.
#[derive(Debug)]
pub struct RequestLogWriter {
    inner: BatchWriter<RequestLogEntry>,
}

impl RequestLogWriter {
    /// Plugin name.
    pub const NAME: &'static str = "request-log";

    /// Starts the background flush task.
    #[must_use]
    pub fn start(sink: Arc<dyn BatchSink<RequestLogEntry>>, config: WriterConfig) -> Self {
        Self {
            inner: BatchWriter::start(Self::NAME, sink, config),
        }
    }

    /// Registers this writer as a usage plugin.
    pub fn register_into(self: &Arc<Self>, registry: &dyn PluginRegistry) {
        registry.register(Arc::clone(self) as Arc<dyn UsagePlugin>);
    }

    /// The underlying batching writer.
    #[must_use]
    pub fn writer(&self) -> &BatchWriter<RequestLogEntry> {
        &self.inner
    }

    /// Final flush and stop.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}

impl UsagePlugin for RequestLogWriter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn handle_usage(&self, report: &UsageReport) {
        self.inner.append(RequestLogEntry::from(report));
    }
}
