//! Persistence error types with HTTP status code mapping.
//!
//! [`StoreError`] is the central error type of the persistence layer. The
//! not-found style variants are typed sentinels so callers can tell an
//! absent row apart from a broken database. Each variant maps to a numeric
//! error code and an HTTP status for the handlers sitting above this layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// SQLSTATE reported by PostgreSQL for `could not serialize access`.
pub const SERIALIZATION_FAILURE_SQLSTATE: &str = "40001";

/// Structured JSON error response body.
///
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "oauth token not found"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Persistence layer error.
///
/// # Error Code Ranges
///
/// | Range     | Category               | HTTP Status                  |
/// |-----------|------------------------|------------------------------|
/// | 1000–1999 | Configuration          | 500 Internal Server Error    |
/// | 2000–2999 | Not found / rejected   | 404 Not Found / 401 Unauthorized |
/// | 3000–3999 | Database               | 500 / 503 / 504              |
/// | 4000–4999 | Migrations             | 409 Conflict                 |
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No primary connection string was configured.
    #[error("primary database connection string is required")]
    MissingPrimaryDsn,

    /// A connection string could not be parsed.
    #[error("invalid connection string: {0}")]
    InvalidDsn(String),

    /// The primary pool could not be opened.
    #[error("failed to connect to primary database: {0}")]
    PrimaryConnect(String),

    /// A configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No active, non-deleted token exists for the lookup key.
    #[error("oauth token not found")]
    TokenNotFound,

    /// No config version is active for the given name.
    #[error("no active config for {0}")]
    NoActiveConfig(String),

    /// No config row exists with the given id.
    #[error("config not found: {0}")]
    ConfigNotFound(uuid::Uuid),

    /// Cache key is absent or expired.
    #[error("cache miss")]
    CacheMiss,

    /// No stored key matches the supplied plaintext.
    #[error("api key not found")]
    ApiKeyNotFound,

    /// The key exists but is inactive or soft-deleted.
    #[error("api key is inactive")]
    ApiKeyInactive,

    /// The key exists but its expiry has passed.
    #[error("api key has expired")]
    ApiKeyExpired,

    /// The migration has no reverse SQL.
    #[error("migration {version} cannot be rolled back")]
    IrreversibleMigration {
        /// Version of the offending migration.
        version: String,
    },

    /// `down` was requested but no migration is applied.
    #[error("no applied migration to roll back")]
    NothingToRollback,

    /// The transaction hit a serialization conflict.
    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    /// The operation did not finish before its deadline.
    #[error("operation timed out")]
    Timeout,

    /// A stored value could not be decoded into its domain type.
    #[error("decode error: {0}")]
    Decode(String),

    /// Any other database failure.
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    /// Returns `true` for the transient conflict a retryable transaction
    /// is allowed to retry.
    #[must_use]
    pub const fn is_serialization_failure(&self) -> bool {
        matches!(self, Self::SerializationFailure(_))
    }

    /// Returns `true` for the typed "absent" sentinels.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TokenNotFound
                | Self::NoActiveConfig(_)
                | Self::ConfigNotFound(_)
                | Self::CacheMiss
                | Self::ApiKeyNotFound
        )
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::MissingPrimaryDsn => 1001,
            Self::InvalidDsn(_) => 1002,
            Self::InvalidConfig(_) => 1003,
            Self::TokenNotFound => 2001,
            Self::NoActiveConfig(_) => 2002,
            Self::ConfigNotFound(_) => 2003,
            Self::CacheMiss => 2004,
            Self::ApiKeyNotFound => 2005,
            Self::ApiKeyInactive => 2006,
            Self::ApiKeyExpired => 2007,
            Self::PrimaryConnect(_) => 3001,
            Self::SerializationFailure(_) => 3002,
            Self::Timeout => 3003,
            Self::Decode(_) => 3004,
            Self::Database(_) => 3000,
            Self::IrreversibleMigration { .. } => 4001,
            Self::NothingToRollback => 4002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::TokenNotFound
            | Self::NoActiveConfig(_)
            | Self::ConfigNotFound(_)
            | Self::CacheMiss => StatusCode::NOT_FOUND,
            Self::ApiKeyNotFound | Self::ApiKeyInactive | Self::ApiKeyExpired => {
                StatusCode::UNAUTHORIZED
            }
            Self::IrreversibleMigration { .. } | Self::NothingToRollback => StatusCode::CONFLICT,
            Self::PrimaryConnect(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::MissingPrimaryDsn
            | Self::InvalidDsn(_)
            | Self::InvalidConfig(_)
            | Self::SerializationFailure(_)
            | Self::Decode(_)
            | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err
            && db_err.code().as_deref() == Some(SERIALIZATION_FAILURE_SQLSTATE)
        {
            return Self::SerializationFailure(db_err.message().to_string());
        }
        Self::Database(err)
    }
}

impl From<tokio::time::error::Elapsed> for StoreError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
