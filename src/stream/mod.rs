//! Document streaming
//!
//! This module handles:
//! * Frame delimiter recognition over arbitrarily split chunks
//! * Lazy decoding of framed chunks into extended JSON documents

mod document_stream;
mod framing;

pub use document_stream::{ChunkSender, DocumentStream};
pub use framing::{decode_all, Frame, FrameDecoder};
