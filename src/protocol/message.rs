//! Protocol message types
//!
//! Every frame on the persistent channel is a JSON text message tagged by its
//! `event` field.

use serde::{Deserialize, Serialize};

/// Stream identifier, unique per session
pub type StreamId = u64;

/// Client message (client → server)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientMessage {
    /// Present a token for the session
    #[serde(rename = "authenticate")]
    Authenticate {
        /// Token generation, echoed by the acknowledgement
        id: u64,
        /// Credentials
        data: AuthData,
    },

    /// Open a named server-side stream
    #[serde(rename = "stream:open")]
    StreamOpen {
        /// Client-chosen stream id
        stream: StreamId,
        /// Stream name (e.g. `collection:sample`)
        name: String,
        /// Stream options, already inflated to canonical extended JSON
        data: serde_json::Value,
    },

    /// Abandon a stream the consumer no longer reads
    #[serde(rename = "stream:close")]
    StreamClose {
        /// Stream id
        stream: StreamId,
    },
}

/// Payload of [`ClientMessage::Authenticate`]
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthData {
    /// Raw token
    pub token: String,
}

impl std::fmt::Debug for AuthData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthData")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Server message (server → client)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerMessage {
    /// Token accepted
    #[serde(rename = "authenticated")]
    Authenticated {
        /// Generation of the accepted token; servers that do not echo it are
        /// taken to acknowledge the latest request
        #[serde(default)]
        id: Option<u64>,
    },

    /// Token rejected
    #[serde(rename = "unauthorized")]
    Unauthorized {
        /// Rejection details
        #[serde(default)]
        data: ErrorData,
    },

    /// Framed chunk of a stream
    #[serde(rename = "stream:data")]
    StreamData {
        /// Stream id
        stream: StreamId,
        /// Framed text
        chunk: String,
    },

    /// Stream finished
    #[serde(rename = "stream:end")]
    StreamEnd {
        /// Stream id
        stream: StreamId,
    },

    /// Stream failed server-side
    #[serde(rename = "stream:error")]
    StreamError {
        /// Stream id
        stream: StreamId,
        /// Failure details
        #[serde(default)]
        data: ErrorData,
    },

    /// Any event this client does not understand
    #[serde(other)]
    Other,
}

/// `{ message }` error payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

impl std::fmt::Display for ErrorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "no message given")
        } else {
            write!(f, "{}", self.message)
        }
    }
}
