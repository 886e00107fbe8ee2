//! Protocol message encoding

use super::message::{AuthData, ClientMessage, StreamId};
use crate::ejson::{self, Value};
use crate::Result;

/// Encode a client message into a text frame
pub fn encode_message(msg: &ClientMessage) -> Result<String> {
    Ok(serde_json::to_string(msg)?)
}

/// Build an `authenticate` message for a token generation
pub fn authenticate(generation: u64, token: &str) -> ClientMessage {
    ClientMessage::Authenticate {
        id: generation,
        data: AuthData {
            token: token.to_string(),
        },
    }
}

/// Build a `stream:open` message, inflating the options to extended JSON
pub fn stream_open(stream: StreamId, name: &str, options: &Value) -> ClientMessage {
    ClientMessage::StreamOpen {
        stream,
        name: name.to_string(),
        data: ejson::inflate(options),
    }
}
