//! Protocol message decoding

use super::message::ServerMessage;
use crate::{Error, Result};

/// Maximum accepted text frame (64 MB).
///
/// Frames above this are rejected before parsing.
const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Decode a server message from a text frame
///
/// Unknown events decode to [`ServerMessage::Other`]; malformed frames and
/// known events with missing fields are protocol errors.
pub fn decode_message(frame: &str) -> Result<ServerMessage> {
    if frame.len() > MAX_FRAME_LENGTH {
        return Err(Error::Protocol(format!(
            "frame length {} exceeds maximum allowed {}",
            frame.len(),
            MAX_FRAME_LENGTH
        )));
    }

    serde_json::from_str(frame)
        .map_err(|e| Error::Protocol(format!("malformed server message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::ErrorData;

    #[test]
    fn test_decode_authenticated() {
        let msg = decode_message(r#"{"event":"authenticated","id":4}"#).unwrap();
        assert_eq!(msg, ServerMessage::Authenticated { id: Some(4) });
    }

    #[test]
    fn test_decode_authenticated_without_id() {
        let msg = decode_message(r#"{"event":"authenticated"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Authenticated { id: None });
    }

    #[test]
    fn test_decode_unauthorized() {
        let msg =
            decode_message(r#"{"event":"unauthorized","data":{"message":"bad token"}}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Unauthorized {
                data: ErrorData {
                    message: "bad token".into()
                }
            }
        );
    }

    #[test]
    fn test_decode_stream_data() {
        let msg = decode_message(r#"{"event":"stream:data","stream":1,"chunk":"[\n{}"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::StreamData {
                stream: 1,
                chunk: "[\n{}".into()
            }
        );
    }

    #[test]
    fn test_decode_stream_error() {
        let msg = decode_message(
            r#"{"event":"stream:error","stream":2,"data":{"message":"ns not found"}}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::StreamError { stream, data } => {
                assert_eq!(stream, 2);
                assert_eq!(data.to_string(), "ns not found");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_event() {
        let msg = decode_message(r#"{"event":"metrics:tick","value":1}"#).unwrap();
        assert_eq!(msg, ServerMessage::Other);
    }

    #[test]
    fn test_decode_malformed() {
        let err = decode_message("not json").unwrap_err();
        assert_eq!(err.category(), "protocol");

        let err = decode_message(r#"{"event":"stream:data","chunk":"x"}"#).unwrap_err();
        assert_eq!(err.category(), "protocol");
    }
}
