//! Stream framing
//!
//! Document streams arrive as a JSON array spread over chunks, each chunk
//! starting with a delimiter:
//!
//! * `[\n`   first document follows
//! * `\n,\n` next document follows
//! * `\n]\n` end of stream
//!
//! The server sends one frame per chunk, but [`FrameDecoder`] works on an
//! accumulating buffer so frames split across chunks, or several frames in one
//! chunk, decode the same way.

use crate::ejson::{self, Value};
use crate::protocol::constants::frames;
use crate::{Error, Result};
use bytes::{Buf, BytesMut};

/// One decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A document
    Document(Value),
    /// End of stream delimiter
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Next bytes must be a delimiter
    AwaitPrefix,
    /// Delimiter consumed, document body (possibly empty) follows
    AwaitBody,
    /// End delimiter seen, or an error was returned
    Done,
}

/// Incremental frame decoder
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder expecting a delimiter
    pub fn new() -> Self {
        Self {
            state: DecoderState::AwaitPrefix,
        }
    }

    /// Whether the end delimiter was seen or decoding failed
    pub fn is_done(&self) -> bool {
        self.state == DecoderState::Done
    }

    /// Decode the next frame from `buf`, consuming the bytes it spans
    ///
    /// Returns `Ok(None)` when more data is needed. Once the end delimiter has
    /// been decoded, or an error returned, every further call yields `Ok(None)`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            match self.state {
                DecoderState::Done => return Ok(None),
                DecoderState::AwaitPrefix => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    if buf.starts_with(frames::END) {
                        buf.advance(frames::END.len());
                        self.state = DecoderState::Done;
                        return Ok(Some(Frame::End));
                    }
                    if buf.starts_with(frames::OPEN) {
                        buf.advance(frames::OPEN.len());
                        self.state = DecoderState::AwaitBody;
                        continue;
                    }
                    if buf.starts_with(frames::NEXT) {
                        buf.advance(frames::NEXT.len());
                        self.state = DecoderState::AwaitBody;
                        continue;
                    }
                    if is_partial_delimiter(buf) {
                        return Ok(None);
                    }
                    self.state = DecoderState::Done;
                    let raw = buf.split().to_vec();
                    return Err(Error::Framing { raw });
                }
                DecoderState::AwaitBody => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    // Empty body: the next delimiter starts right away
                    if buf.starts_with(frames::NEXT) || buf.starts_with(frames::END) {
                        self.state = DecoderState::AwaitPrefix;
                        continue;
                    }
                    // A lone newline is either a delimiter start or whitespace
                    if is_partial_continuation(buf) {
                        return Ok(None);
                    }
                    return self.decode_body(buf);
                }
            }
        }
    }

    /// Validate what is left once the producer signals end of stream
    ///
    /// A stream may end without an explicit end delimiter; whitespace and an
    /// empty trailing body are accepted, anything else is an error.
    pub fn finish(&mut self, buf: &mut BytesMut) -> Result<()> {
        let state = std::mem::replace(&mut self.state, DecoderState::Done);
        let rest = buf.split();
        if state == DecoderState::Done || rest.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        match state {
            DecoderState::AwaitBody => Err(Error::Json(format!(
                "truncated document at end of stream: `{}`",
                String::from_utf8_lossy(&rest)
            ))),
            _ => Err(Error::Framing { raw: rest.to_vec() }),
        }
    }

    fn decode_body(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        let mut values =
            serde_json::Deserializer::from_slice(&buf[..]).into_iter::<serde_json::Value>();
        match values.next() {
            Some(Ok(json)) => {
                let consumed = values.byte_offset();
                buf.advance(consumed);
                self.state = DecoderState::AwaitPrefix;
                match ejson::revive(json) {
                    Ok(doc) => Ok(Some(Frame::Document(doc))),
                    Err(e) => {
                        self.state = DecoderState::Done;
                        Err(e)
                    }
                }
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            None => Ok(None),
            Some(Err(e)) => {
                self.state = DecoderState::Done;
                Err(Error::Json(e.to_string()))
            }
        }
    }
}

fn is_partial_continuation(buf: &[u8]) -> bool {
    [frames::NEXT, frames::END]
        .iter()
        .any(|d| buf.len() < d.len() && d.starts_with(buf))
}

fn is_partial_delimiter(buf: &[u8]) -> bool {
    [frames::OPEN, frames::NEXT, frames::END]
        .iter()
        .any(|d| buf.len() < d.len() && d.starts_with(buf))
}

/// Decode a complete framed payload in one go
pub fn decode_all(input: &[u8]) -> Result<Vec<Value>> {
    let mut buf = BytesMut::from(input);
    let mut decoder = FrameDecoder::new();
    let mut docs = Vec::new();
    while let Some(frame) = decoder.decode(&mut buf)? {
        match frame {
            Frame::Document(doc) => docs.push(doc),
            Frame::End => return Ok(docs),
        }
    }
    decoder.finish(&mut buf)?;
    Ok(docs)
}
