//! Error types for idgate.
//!
//! Every failure the client can surface is an [`ApiError`]. The variants map
//! one-to-one onto the ways a call to the backend can go wrong, so callers can
//! decide between retrying, re-authenticating, or showing a message.

use std::time::Duration;
use thiserror::Error;

/// The main error type for idgate operations.
///
/// `ApiError` is `Clone` so that a single refresh outcome can be handed to
/// every request waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No response was received (connection refused, DNS, timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with a 5xx status.
    #[error("Server error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Human-readable message extracted from the response.
        message: String,
        /// Retry-After header value.
        retry_after: Option<Duration>,
    },

    /// The backend answered 429.
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Human-readable message extracted from the response.
        message: String,
        /// Retry-After header value.
        retry_after: Option<Duration>,
    },

    /// The backend answered with a 4xx status other than 401 and 429.
    #[error("Request failed with status {status}: {message}")]
    Client {
        /// HTTP status code.
        status: u16,
        /// Human-readable message extracted from the response.
        message: String,
    },

    /// The backend answered 401.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The session could not be refreshed and the user must log in again.
    #[error("Session expired: {0}")]
    AuthExpired(String),

    /// The login endpoint rejected the supplied credentials.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// An access token could not be decoded.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Durable storage could not be read or written.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A mutating request failed and was stored for later replay.
    #[error("Request queued for later replay ({id}): {reason}")]
    Queued {
        /// Id of the queued request.
        id: String,
        /// The failure that caused the request to be queued.
        reason: String,
    },

    /// A request or response body could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type alias using [`ApiError`].
pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Classify a non-success HTTP response.
    ///
    /// `body` is the raw response body; a JSON `detail` or `message` field is
    /// preferred as the human-readable message.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let message = extract_message(status, body);
        match status {
            401 => Self::Unauthorized(message),
            429 => Self::RateLimited {
                message,
                retry_after,
            },
            500..=599 => Self::Server {
                status,
                message,
                retry_after,
            },
            _ => Self::Client { status, message },
        }
    }

    /// Get the HTTP status if the backend answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Unauthorized(_) | Self::InvalidCredentials => Some(401),
            _ => None,
        }
    }

    /// Get the suggested retry-after duration.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Server { retry_after, .. } | Self::RateLimited { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }

    /// Whether the failure is transient (network, 5xx, 429).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Server { .. } | Self::RateLimited { .. }
        )
    }

    /// Whether the failure means the user has to authenticate again.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_) | Self::AuthExpired(_) | Self::InvalidCredentials
        )
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Pull a readable message out of an error body.
fn extract_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "message", "error"] {
            match value.get(key) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => return s.clone(),
                Some(other) if !other.is_null() => return other.to_string(),
                _ => {}
            }
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    default_reason(status).to_string()
}

fn default_reason(status: u16) -> &'static str {
    match status {
        400 => "Bad request",
        401 => "Not authenticated",
        403 => "Forbidden",
        404 => "Not found",
        409 => "Conflict",
        422 => "Validation failed",
        429 => "Too many requests",
        500 => "Internal server error",
        502 => "Bad gateway",
        503 => "Service unavailable",
        504 => "Gateway timeout",
        _ => "Unexpected response",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(500, true)]
    #[case(503, true)]
    #[case(429, true)]
    #[case(404, false)]
    #[case(400, false)]
    #[case(401, false)]
    fn test_from_status_transience(#[case] status: u16, #[case] transient: bool) {
        let err = ApiError::from_status(status, "", None);
        assert_eq!(err.is_transient(), transient);
        assert_eq!(err.status(), Some(status));
    }

    #[test]
    fn test_message_from_detail() {
        let err = ApiError::from_status(404, r#"{"detail": "Identity not found"}"#, None);
        assert_eq!(
            err,
            ApiError::Client {
                status: 404,
                message: "Identity not found".into()
            }
        );
        assert!(err.to_string().contains("Identity not found"));
    }

    #[test]
    fn test_message_from_structured_detail() {
        let err = ApiError::from_status(422, r#"{"detail": [{"loc": ["page"]}]}"#, None);
        assert!(err.to_string().contains("loc"));
    }

    #[test]
    fn test_message_falls_back_to_reason() {
        let err = ApiError::from_status(503, "   ", Some(Duration::from_secs(2)));
        assert!(err.to_string().contains("Service unavailable"));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_network_is_transient() {
        assert!(ApiError::network("connection refused").is_transient());
        assert!(!ApiError::InvalidCredentials.is_transient());
        assert!(ApiError::AuthExpired("gone".into()).is_auth_failure());
    }
}
