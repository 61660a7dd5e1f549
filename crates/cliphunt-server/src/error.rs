use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// HTTP-level failures returned before a socket is upgraded.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    ServiceUnavailable(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(m) | Self::ServiceUnavailable(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            Self::ServiceUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Snapshot read/write failures.
#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Serialization(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "storage I/O error: {e}"),
            Self::Serialization(e) => write!(f, "snapshot serialization error: {e}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Serialization(_) => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Why the router turned a frame down. Variants that carry client-facing
/// text are answered with an `error` frame; the rest are dropped silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Malformed JSON, unknown tag or a field out of range.
    Invalid(String),
    NotAuthenticated,
    /// Chat sent inside its cooldown window.
    SlowDown,
    /// Text rejected by moderation.
    Blocked,
    /// Well-formed but refused, with the reason shown to the caller.
    Rejected(String),
    /// Dropped without a reply: wrong phase, not host, cooldown, unknown id.
    Ignored(&'static str),
}

impl RouteError {
    /// Text for the `error` frame, or `None` for a silent drop.
    pub fn client_message(&self) -> Option<String> {
        match self {
            Self::Invalid(m) | Self::Rejected(m) => Some(m.clone()),
            Self::NotAuthenticated => Some("Not authenticated.".to_string()),
            Self::SlowDown => Some("Slow down.".to_string()),
            Self::Blocked => Some("Message blocked.".to_string()),
            Self::Ignored(_) => None,
        }
    }
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ignored(reason) => write!(f, "ignored: {reason}"),
            other => write!(f, "{}", other.client_message().unwrap_or_default()),
        }
    }
}

impl std::error::Error for RouteError {}
