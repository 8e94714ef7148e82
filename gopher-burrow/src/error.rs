//! Error types for gopher-burrow
//!
//! [`CatalogError`] is the catalog engine taxonomy; [`ApiError`] maps it onto
//! HTTP statuses and the `{"error": {...}}` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gopher_common::{Fingerprint, IdentityError};
use serde_json::json;
use thiserror::Error;

/// Catalog engine errors
#[derive(Debug, Error)]
pub enum CatalogError {
    /// File bytes could not be hashed (per entry, non-fatal to a batch)
    #[error("Unreadable input: {0}")]
    UnreadableInput(String),

    /// Structural problem with a scan report (fatal to the batch)
    #[error("Malformed report: {0}")]
    MalformedReport(String),

    /// Lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    /// Merge would close a forwarding cycle
    #[error("Merging {from} into {to} would create a cycle")]
    CycleDetected { from: Fingerprint, to: Fingerprint },

    /// Merge of a record into itself
    #[error("Cannot merge {0} into itself")]
    SelfMerge(Fingerprint),

    /// Lost a race or contradicts committed state; retry may succeed
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Bounded wait for a per-key lock expired
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Catalog backend unreachable or busy
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Tag name failed normalization
    #[error("Invalid tag: {0}")]
    InvalidTag(String),

    /// Request value outside its accepted range
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Scanner-supplied fingerprint disagrees with the bytes
    #[error("Fingerprint mismatch: supplied {supplied}, computed {computed}")]
    FingerprintMismatch {
        supplied: Fingerprint,
        computed: Fingerprint,
    },

    /// Merge source has no locations, so nothing ties it to the target
    #[error("Nothing to merge: {0} has no known locations")]
    NothingToMerge(Fingerprint),

    /// Non-transient database failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

impl CatalogError {
    /// Machine readable code used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::UnreadableInput(_) => "unreadable-input",
            CatalogError::MalformedReport(_) => "malformed-report",
            CatalogError::NotFound(_) => "not-found",
            CatalogError::CycleDetected { .. } => "cycle-detected",
            CatalogError::SelfMerge(_) => "self-merge",
            CatalogError::Conflict(_) => "conflict",
            CatalogError::Timeout(_) => "timeout",
            CatalogError::StorageUnavailable(_) => "storage-unavailable",
            CatalogError::InvalidTag(_) => "invalid-tag",
            CatalogError::InvalidValue(_) => "bad-request",
            CatalogError::FingerprintMismatch { .. } => "fingerprint-mismatch",
            CatalogError::NothingToMerge(_) => "nothing-to-merge",
            CatalogError::Storage(_) => "storage-error",
            CatalogError::Internal(_) => "internal",
        }
    }

    /// Whether resending the identical request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CatalogError::Conflict(_)
                | CatalogError::Timeout(_)
                | CatalogError::StorageUnavailable(_)
        )
    }

    /// Transient storage failures are retried internally with backoff
    pub fn is_transient_storage(&self) -> bool {
        matches!(self, CatalogError::StorageUnavailable(_))
    }
}

/// SQLite result codes for SQLITE_BUSY / SQLITE_LOCKED (and extended forms)
fn is_busy_code(code: &str) -> bool {
    matches!(code, "5" | "6" | "261" | "262" | "517")
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                CatalogError::StorageUnavailable(err.to_string())
            }
            sqlx::Error::Database(db_err) => {
                let busy = db_err.code().map(|c| is_busy_code(&c)).unwrap_or(false);
                let message = db_err.message().to_lowercase();
                if busy || message.contains("database is locked") || message.contains("busy") {
                    CatalogError::StorageUnavailable(err.to_string())
                } else {
                    CatalogError::Storage(err.to_string())
                }
            }
            _ => CatalogError::Storage(err.to_string()),
        }
    }
}

impl From<IdentityError> for CatalogError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::UnreadableInput(msg) => CatalogError::UnreadableInput(msg),
            IdentityError::InvalidFingerprint(msg) => {
                CatalogError::MalformedReport(format!("invalid fingerprint '{}'", msg))
            }
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Conflict (409) - e.g., library already registered
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Catalog engine error
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

fn catalog_status(err: &CatalogError) -> StatusCode {
    match err {
        CatalogError::MalformedReport(_)
        | CatalogError::InvalidTag(_)
        | CatalogError::InvalidValue(_)
        | CatalogError::UnreadableInput(_)
        | CatalogError::FingerprintMismatch { .. } => StatusCode::BAD_REQUEST,
        CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
        CatalogError::CycleDetected { .. }
        | CatalogError::SelfMerge(_)
        | CatalogError::NothingToMerge(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CatalogError::Conflict(_) => StatusCode::CONFLICT,
        CatalogError::Timeout(_) | CatalogError::StorageUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CatalogError::Storage(_) | CatalogError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, retryable) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad-request", msg, false),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not-found", msg, false),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, false),
            ApiError::Catalog(ref err) => (
                catalog_status(err),
                err.code(),
                err.to_string(),
                err.is_retryable(),
            ),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg, false)
            }
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, %message, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
                "retryable": retryable,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
