//! Scope server wire protocol
//!
//! This module handles:
//! * Route and timing constants
//! * Message types of the persistent channel
//! * Text frame encoding and decoding

pub mod constants;
mod decode;
mod encode;
mod message;

pub use decode::decode_message;
pub use encode::{authenticate, encode_message, stream_open};
pub use message::{AuthData, ClientMessage, ErrorData, ServerMessage, StreamId};
