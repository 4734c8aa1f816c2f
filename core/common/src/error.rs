//! Common error types for the Tether offline layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes surfaced to callers.
///
/// Callers pattern-match on these instead of inspecting transport
/// internals. `Queued` is not a failure: it is the code carried by the
/// success-shaped deferred outcome when a mutation is accepted offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NetworkOffline,
    NetworkError,
    TimeoutError,
    ServerError,
    ValidationError,
    AuthError,
    Queued,
    Cancelled,
    UnknownError,
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NetworkOffline => "NETWORK_OFFLINE",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::TimeoutError => "TIMEOUT_ERROR",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::AuthError => "AUTH_ERROR",
            ErrorCode::Queued => "QUEUED",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for remote operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Device is definitely offline; no network I/O was attempted.
    #[error("network offline")]
    Offline,

    /// Transient transport failure (connection reset, DNS, unreachable).
    #[error("network error: {0}")]
    Network(String),

    /// Per-attempt deadline exceeded.
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Remote service failure (5xx) or rate limit (429).
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Client-side validation failure (4xx other than 401/429).
    #[error("validation error ({status}): {message}")]
    Validation { status: u16, message: String },

    /// Authentication failed and session renewal did not recover it.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The caller aborted the request.
    #[error("request cancelled")]
    Cancelled,

    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Fallback wrapper preserving original details.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl ApiError {
    /// Map an HTTP status into the taxonomy.
    ///
    /// 401 is an auth failure, 429 and 5xx are retryable server errors,
    /// every other 4xx is a terminal validation error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => ApiError::Auth(message),
            429 => ApiError::Server { status, message },
            s if s >= 500 => ApiError::Server { status: s, message },
            s if s >= 400 => ApiError::Validation { status: s, message },
            _ => ApiError::Unknown(message),
        }
    }

    /// Stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Offline => ErrorCode::NetworkOffline,
            ApiError::Network(_) => ErrorCode::NetworkError,
            ApiError::Timeout(_) => ErrorCode::TimeoutError,
            ApiError::Server { .. } => ErrorCode::ServerError,
            ApiError::Validation { .. } => ErrorCode::ValidationError,
            ApiError::Auth(_) => ErrorCode::AuthError,
            ApiError::Cancelled => ErrorCode::Cancelled,
            ApiError::Storage(_) | ApiError::Serialization(_) | ApiError::Unknown(_) => {
                ErrorCode::UnknownError
            }
        }
    }

    /// HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } | ApiError::Validation { status, .. } => Some(*status),
            ApiError::Auth(_) => Some(401),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Serialization(err.to_string())
    }
}

/// Result type alias using the common ApiError.
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(ApiError::from_status(401, "x"), ApiError::Auth(_)));
        assert!(matches!(
            ApiError::from_status(429, "x"),
            ApiError::Server { status: 429, .. }
        ));
        assert!(matches!(
            ApiError::from_status(503, "x"),
            ApiError::Server { status: 503, .. }
        ));
        assert!(matches!(
            ApiError::from_status(422, "x"),
            ApiError::Validation { status: 422, .. }
        ));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ApiError::Offline.code(), ErrorCode::NetworkOffline);
        assert_eq!(ApiError::Timeout(15000).code().as_str(), "TIMEOUT_ERROR");
        assert_eq!(
            ApiError::from_status(500, "boom").code(),
            ErrorCode::ServerError
        );
        assert_eq!(ErrorCode::Queued.as_str(), "QUEUED");
    }

    #[test]
    fn test_status_accessor() {
        assert_eq!(ApiError::from_status(503, "x").status(), Some(503));
        assert_eq!(ApiError::Auth("expired".into()).status(), Some(401));
        assert_eq!(ApiError::Offline.status(), None);
    }
}
