//! Error types for scope-client

use serde::Serialize;
use thiserror::Error;

/// Main error type
///
/// `Error` is `Clone`: a client that has gone dead keeps the terminating error
/// and hands a copy to every subsequent caller.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Server rejected the credentials or the token
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Server issued a token that expires inside the minimum validity window
    #[error("token expires too soon: {remaining_secs}s left, at least {minimum_secs}s required")]
    ExpiryTooSoon {
        /// Seconds of validity the token actually had
        remaining_secs: i64,
        /// Seconds of validity required at issuance
        minimum_secs: u64,
    },

    /// Socket or HTTP transport failure
    #[error("{}", transport_message(.message, .hint))]
    Transport {
        /// Underlying failure
        message: String,
        /// Friendly explanation for recognizable causes
        hint: Option<String>,
    },

    /// Stream frame did not start with a recognized delimiter
    #[error("unknown stream frame `{}`", String::from_utf8_lossy(.raw))]
    Framing {
        /// Offending bytes
        raw: Vec<u8>,
    },

    /// Operation attempted after the client was closed
    #[error("client already closed")]
    Closed,

    /// Malformed server response or message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// HTTP error response
    #[error("{message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Message from the response body, or the status reason
        message: String,
    },

    /// Error reported by the server for one stream
    #[error("stream failed: {0}")]
    Remote(String),

    /// JSON or extended JSON decoding failure
    #[error("json error: {0}")]
    Json(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Invalid database or collection name
    #[error("invalid namespace `{0}`")]
    InvalidNamespace(String),

    /// Invalid state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Operation did not complete in time
    #[error("timed out: {0}")]
    Timeout(String),
}

fn transport_message(message: &str, hint: &Option<String>) -> String {
    match hint {
        Some(hint) => format!("{} ({})", hint, message),
        None => format!("transport error: {}", message),
    }
}

impl Error {
    /// Transport error without a hint
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            hint: None,
        }
    }

    /// Translate a channel-level failure into a `Transport` error, attaching a hint
    /// when the cause is recognizable.
    pub fn from_channel(message: impl Into<String>, endpoint: &str) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let hint = if lower.contains("connection refused")
            || lower.contains("econnrefused")
            || lower.contains("os error 111")
            || lower.contains("os error 61")
            || lower.contains("access-control-allow-origin")
        {
            Some(format!("scope server not running at {}?", endpoint))
        } else {
            None
        };
        Error::Transport { message, hint }
    }

    /// HTTP status associated with this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::Auth(_) => Some(401),
            _ => None,
        }
    }

    /// Human readable hint attached to transport errors
    pub fn hint(&self) -> Option<&str> {
        match self {
            Error::Transport { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }

    /// Check if error is a retriable transport failure
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Timeout(_))
    }

    /// Get error category for observability and logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Auth(_) => "auth",
            Error::ExpiryTooSoon { .. } => "expiry_too_soon",
            Error::Transport { .. } => "transport",
            Error::Framing { .. } => "framing",
            Error::Closed => "closed",
            Error::Protocol(_) => "protocol",
            Error::Http { .. } => "http",
            Error::Remote(_) => "remote",
            Error::Json(_) => "json",
            Error::Config(_) => "config",
            Error::InvalidNamespace(_) => "invalid_namespace",
            Error::InvalidState { .. } => "invalid_state",
            Error::Timeout(_) => "timeout",
        }
    }

    /// Normalized form handed to resource helpers and other collaborators
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            message: self.to_string(),
            status: self.status(),
        }
    }
}

/// Serializable `{ message, status }` error object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Human readable message
    pub message: String,
    /// HTTP status, where applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::transport(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::Config(format!("invalid url: {}", e))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
