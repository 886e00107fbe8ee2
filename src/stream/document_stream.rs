//! Lazy document stream fed by the transport session

use super::framing::{Frame, FrameDecoder};
use crate::ejson::Value;
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Raw input of a document stream
#[derive(Debug)]
pub(crate) enum StreamChunk {
    /// Framed bytes
    Data(Bytes),
    /// Producer finished
    End,
    /// Producer failed
    Error(Error),
}

/// Producer half of a [`DocumentStream`]
///
/// [`finish`](ChunkSender::finish) consumes the sender, so the terminal signal
/// is delivered at most once.
#[derive(Debug)]
pub struct ChunkSender {
    tx: mpsc::UnboundedSender<StreamChunk>,
}

impl ChunkSender {
    /// Forward a framed chunk; returns `false` once the consumer is gone
    pub fn send(&self, chunk: impl Into<Bytes>) -> bool {
        self.tx.send(StreamChunk::Data(chunk.into())).is_ok()
    }

    /// Deliver the terminal signal
    pub fn finish(self, result: Result<()>) {
        let chunk = match result {
            Ok(()) => StreamChunk::End,
            Err(e) => StreamChunk::Error(e),
        };
        let _ = self.tx.send(chunk);
    }

    /// Whether the consumer dropped its stream
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Forward-only stream of extended JSON documents
///
/// Documents are decoded lazily as the consumer polls. A framing or decoding
/// error is yielded once and terminates the stream.
///
/// # Examples
///
/// ```ignore
/// use futures::StreamExt;
///
/// let mut docs = client.sample_stream("db.coll", SampleOptions::default());
/// while let Some(doc) = docs.next().await {
///     println!("{}", doc?);
/// }
/// ```
pub struct DocumentStream {
    name: Arc<str>,
    rx: mpsc::UnboundedReceiver<StreamChunk>,
    buf: BytesMut,
    decoder: FrameDecoder,
    done: bool,
    documents: u64,
}

impl DocumentStream {
    /// Create a connected producer/consumer pair
    pub fn channel(name: impl Into<Arc<str>>) -> (ChunkSender, DocumentStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = DocumentStream {
            name: name.into(),
            rx,
            buf: BytesMut::new(),
            decoder: FrameDecoder::new(),
            done: false,
            documents: 0,
        };
        (ChunkSender { tx }, stream)
    }

    /// A stream that yields `err` once and ends
    pub fn failed(name: impl Into<Arc<str>>, err: Error) -> DocumentStream {
        let (tx, stream) = Self::channel(name);
        tx.finish(Err(err));
        stream
    }

    /// Stream name (e.g. `collection:sample`)
    pub fn name(&self) -> &str {
        &self.name
    }

    fn complete(&mut self, outcome: &'static str) {
        self.done = true;
        self.rx.close();
        tracing::debug!(
            stream = %self.name,
            documents = self.documents,
            outcome,
            "document stream finished"
        );
        crate::metrics::counters::stream_completed(&self.name, outcome);
    }

    fn fail(&mut self, err: Error) -> Poll<Option<Result<Value>>> {
        if matches!(err, Error::Framing { .. }) {
            crate::metrics::counters::framing_error(&self.name);
        }
        self.complete("error");
        Poll::Ready(Some(Err(err)))
    }
}

impl std::fmt::Debug for DocumentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStream")
            .field("name", &self.name)
            .field("buffered", &self.buf.len())
            .field("done", &self.done)
            .finish()
    }
}

impl Stream for DocumentStream {
    type Item = Result<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if this.done {
                return Poll::Ready(None);
            }

            match this.decoder.decode(&mut this.buf) {
                Ok(Some(Frame::Document(doc))) => {
                    this.documents += 1;
                    crate::metrics::counters::document_decoded(&this.name);
                    return Poll::Ready(Some(Ok(doc)));
                }
                Ok(Some(Frame::End)) => {
                    this.complete("ok");
                    return Poll::Ready(None);
                }
                Ok(None) => {}
                Err(e) => return this.fail(e),
            }

            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(StreamChunk::Data(bytes))) => {
                    this.buf.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(StreamChunk::End)) => {
                    return match this.decoder.finish(&mut this.buf) {
                        Ok(()) => {
                            this.complete("ok");
                            Poll::Ready(None)
                        }
                        Err(e) => this.fail(e),
                    };
                }
                Poll::Ready(Some(StreamChunk::Error(e))) => return this.fail(e),
                Poll::Ready(None) => {
                    return this.fail(Error::transport("stream abandoned before completion"));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
