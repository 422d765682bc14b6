//! Database models for the six persisted entities.
//!
//! Row structs derive [`sqlx::FromRow`] and map one-to-one onto the tables
//! created by [`super::schema`]. Input structs (`*Upsert`, [`UsageRecord`],
//! [`RequestLogEntry`]) carry only the columns a caller may write.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Upstream AI provider a token, usage row, or request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    /// Anthropic Claude.
    Claude,
    /// Google Gemini (AI Studio / Gemini CLI).
    Gemini,
    /// OpenAI Codex.
    Codex,
    /// Alibaba Qwen.
    Qwen,
    /// iFlow.
    Iflow,
    /// Google Antigravity.
    Antigravity,
    /// Google Vertex AI.
    Vertex,
    /// Any OpenAI-compatible upstream.
    OpenaiCompatible,
}

impl Provider {
    /// Every supported provider, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Claude,
        Self::Gemini,
        Self::Codex,
        Self::Qwen,
        Self::Iflow,
        Self::Antigravity,
        Self::Vertex,
        Self::OpenaiCompatible,
    ];

    /// Returns the stored text form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Codex => "codex",
            Self::Qwen => "qwen",
            Self::Iflow => "iflow",
            Self::Antigravity => "antigravity",
            Self::Vertex => "vertex",
            Self::OpenaiCompatible => "openai-compatible",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored provider string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

impl TryFrom<String> for Provider {
    type Error = UnknownProvider;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UnknownProvider> for StoreError {
    fn from(err: UnknownProvider) -> Self {
        Self::Decode(err.to_string())
    }
}

/// A stored OAuth credential for one provider account.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OAuthToken {
    /// Row identifier.
    pub id: Uuid,
    /// Provider the token authenticates against.
    #[sqlx(try_from = "String")]
    pub provider: Provider,
    /// Provider-side account identifier.
    pub user_id: String,
    /// Account email, when the provider reports one.
    pub email: Option<String>,
    /// Bearer token material.
    #[serde(skip_serializing)]
    pub access_token: String,
    /// Refresh token material.
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    /// Token type reported by the provider (usually `Bearer`).
    pub token_type: String,
    /// Access token expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted scopes, in grant order.
    pub scopes: Vec<String>,
    /// Free-form provider metadata.
    pub metadata: serde_json::Value,
    /// Whether the token may be used.
    pub is_active: bool,
    /// Last time the gateway used the token.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Writable fields of an [`OAuthToken`], keyed on `(provider, user_id)`.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthTokenUpsert {
    /// Provider the token authenticates against.
    pub provider: Provider,
    /// Provider-side account identifier.
    pub user_id: String,
    /// Account email.
    pub email: Option<String>,
    /// Bearer token material.
    pub access_token: String,
    /// Refresh token; `None` keeps the stored one.
    pub refresh_token: Option<String>,
    /// Token type.
    pub token_type: String,
    /// Access token expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Free-form provider metadata.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl fmt::Debug for OAuthTokenUpsert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokenUpsert")
            .field("provider", &self.provider)
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// Aggregation key of a usage-stats row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageKey {
    /// Provider.
    pub provider: Provider,
    /// Model name.
    pub model: String,
    /// Auth identifier (token or key) the usage is attributed to.
    pub auth_id: String,
    /// Calendar date (UTC).
    pub date: NaiveDate,
}

/// Counters to add onto the usage-stats row for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Provider.
    pub provider: Provider,
    /// Model name.
    pub model: String,
    /// Auth identifier.
    pub auth_id: String,
    /// Calendar date (UTC).
    pub date: NaiveDate,
    /// Number of requests.
    pub request_count: i64,
    /// Prompt tokens.
    pub input_tokens: i64,
    /// Completion tokens.
    pub output_tokens: i64,
    /// Reasoning tokens.
    pub reasoning_tokens: i64,
    /// Cached prompt tokens.
    pub cached_tokens: i64,
    /// Successful requests.
    pub success_count: i64,
    /// Failed requests.
    pub error_count: i64,
}

impl UsageRecord {
    /// Sum of the four token counters. Never stored independently.
    #[must_use]
    pub const fn total_tokens(&self) -> i64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.reasoning_tokens)
            .saturating_add(self.cached_tokens)
    }

    /// Returns the aggregation key.
    #[must_use]
    pub fn key(&self) -> UsageKey {
        UsageKey {
            provider: self.provider,
            model: self.model.clone(),
            auth_id: self.auth_id.clone(),
            date: self.date,
        }
    }

    /// Adds every counter of `other` onto `self`.
    pub fn absorb(&mut self, other: &Self) {
        self.request_count = self.request_count.saturating_add(other.request_count);
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.reasoning_tokens = self.reasoning_tokens.saturating_add(other.reasoning_tokens);
        self.cached_tokens = self.cached_tokens.saturating_add(other.cached_tokens);
        self.success_count = self.success_count.saturating_add(other.success_count);
        self.error_count = self.error_count.saturating_add(other.error_count);
    }
}

/// Merges records that share a key, preserving first-seen order.
///
/// The merged counters equal what applying every record one at a time
/// through the additive upsert would store.
#[must_use]
pub fn merge_usage_records(records: &[UsageRecord]) -> Vec<UsageRecord> {
    let mut positions: HashMap<UsageKey, usize> = HashMap::with_capacity(records.len());
    let mut merged: Vec<UsageRecord> = Vec::with_capacity(records.len());
    for record in records {
        match positions.get(&record.key()) {
            Some(&pos) => {
                if let Some(existing) = merged.get_mut(pos) {
                    existing.absorb(record);
                }
            }
            None => {
                positions.insert(record.key(), merged.len());
                merged.push(record.clone());
            }
        }
    }
    merged
}

/// A stored usage-stats aggregate row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UsageStats {
    /// Row identifier.
    pub id: i64,
    /// Provider.
    #[sqlx(try_from = "String")]
    pub provider: Provider,
    /// Model name.
    pub model: String,
    /// Auth identifier.
    pub auth_id: String,
    /// Calendar date (UTC).
    pub date: NaiveDate,
    /// Number of requests.
    pub request_count: i64,
    /// Prompt tokens.
    pub input_tokens: i64,
    /// Completion tokens.
    pub output_tokens: i64,
    /// Reasoning tokens.
    pub reasoning_tokens: i64,
    /// Cached prompt tokens.
    pub cached_tokens: i64,
    /// Generated column: sum of the four token counters.
    pub total_tokens: i64,
    /// Successful requests.
    pub success_count: i64,
    /// Failed requests.
    pub error_count: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A stored API key. Only the SHA-256 hash of the key is persisted.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ApiKey {
    /// Row identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Hex-encoded SHA-256 of the plaintext key.
    #[serde(skip_serializing)]
    pub key_hash: String,
    /// Leading characters of the plaintext key, for display.
    pub key_prefix: String,
    /// Requests per minute allowed for the key.
    pub rate_limit: i32,
    /// Whether the key may be used.
    pub is_active: bool,
    /// Optional expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Last successful validation (updated asynchronously).
    pub last_used_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// Checks the flags that must hold even when the hash matched.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ApiKeyInactive`] if inactive or soft-deleted.
    /// - [`StoreError::ApiKeyExpired`] if `expires_at` is not after `now`.
    pub fn ensure_usable(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        if !self.is_active || self.deleted_at.is_some() {
            return Err(StoreError::ApiKeyInactive);
        }
        if let Some(expires_at) = self.expires_at
            && expires_at <= now
        {
            return Err(StoreError::ApiKeyExpired);
        }
        Ok(())
    }
}

/// A freshly created API key. The plaintext is never stored and is only
/// available here.
#[derive(Clone)]
pub struct NewApiKey {
    /// The stored row.
    pub key: ApiKey,
    /// Plaintext key to hand to the client exactly once.
    pub plaintext: String,
}

impl fmt::Debug for NewApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewApiKey")
            .field("key", &self.key)
            .field("plaintext", &"<redacted>")
            .finish()
    }
}

/// A named, versioned YAML configuration blob.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ConfigEntry {
    /// Row identifier.
    pub id: Uuid,
    /// Config name.
    pub name: String,
    /// Raw YAML content; not interpreted by this layer.
    pub content: String,
    /// Monotonic version, starting at 1.
    pub version: i32,
    /// Whether this is the active version for its name.
    pub is_active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A cached value with expiry and invalidation tags.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CacheEntry {
    /// Cache key.
    pub key: String,
    /// Raw cached bytes.
    pub value: Vec<u8>,
    /// MIME type of `value`.
    pub content_type: String,
    /// Invalidation tags.
    pub tags: Vec<String>,
    /// Entries at or past this instant are invisible to reads.
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last overwrite timestamp.
    pub updated_at: DateTime<Utc>,
}

/// One gateway request, as appended to the request log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLogEntry {
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
    pub status_code: i32,
    /// End-to-end latency in milliseconds.
    pub latency_ms: i64,
    /// Prompt tokens.
    pub input_tokens: i64,
    /// Completion tokens.
    pub output_tokens: i64,
    /// Error text for failed requests.
    pub error: Option<String>,
    /// When the request was received.
    pub created_at: DateTime<Utc>,
}

/// A stored request-log row. Append-only.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RequestLog {
    /// Row identifier.
    pub id: i64,
    /// Gateway-assigned request identifier.
    pub request_id: String,
    /// Provider.
    #[sqlx(try_from = "String")]
    pub provider: Provider,
    /// Model requested.
    pub model: String,
    /// Auth identifier.
    pub auth_id: String,
    /// API key id.
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
    pub status_code: i32,
    /// Latency in milliseconds.
    pub latency_ms: i64,
    /// Prompt tokens.
    pub input_tokens: i64,
    /// Completion tokens.
    pub output_tokens: i64,
    /// Error text.
    pub error: Option<String>,
    /// When the request was received.
    pub created_at: DateTime<Utc>,
}
