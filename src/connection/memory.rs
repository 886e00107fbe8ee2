//! In-memory transport
//!
//! Pairs a [`MemoryConnector`] handed to a client with a [`MemoryListener`]
//! that plays the server side. Every successful `connect` yields one
//! [`MemoryPeer`] on the listener; dropping the peer drops the connection.

use super::transport::{Connector, FrameSink, FrameSource};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;

/// Client side of the in-memory transport
#[derive(Clone)]
pub struct MemoryConnector {
    inner: Arc<Mutex<ConnectorState>>,
}

struct ConnectorState {
    accepts: mpsc::UnboundedSender<MemoryPeer>,
    refuse: bool,
    attempts: usize,
    connects: usize,
}

impl MemoryConnector {
    /// Create a connector and the listener receiving its connections
    pub fn new() -> (MemoryConnector, MemoryListener) {
        let (accepts, rx) = mpsc::unbounded();
        let connector = MemoryConnector {
            inner: Arc::new(Mutex::new(ConnectorState {
                accepts,
                refuse: false,
                attempts: 0,
                connects: 0,
            })),
        };
        (connector, MemoryListener { rx })
    }

    /// Refuse (or accept again) further connection attempts
    pub fn set_refusing(&self, refuse: bool) {
        self.inner.lock().refuse = refuse;
    }

    /// Number of connection attempts so far, refused ones included
    pub fn attempts(&self) -> usize {
        self.inner.lock().attempts
    }

    /// Number of successful connects so far
    pub fn connects(&self) -> usize {
        self.inner.lock().connects
    }
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("MemoryConnector")
            .field("refuse", &state.refuse)
            .field("connects", &state.connects)
            .finish()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> Result<(FrameSink, FrameSource)> {
        let mut state = self.inner.lock();
        state.attempts += 1;
        if state.refuse {
            return Err(Error::from_channel("connection refused", endpoint));
        }

        let (client_tx, server_rx) = mpsc::unbounded::<String>();
        let (server_tx, client_rx) = mpsc::unbounded::<Result<String>>();
        let peer = MemoryPeer {
            incoming: server_rx,
            outgoing: server_tx,
        };
        state
            .accepts
            .unbounded_send(peer)
            .map_err(|_| Error::from_channel("connection refused", endpoint))?;
        state.connects += 1;

        let sink = futures::sink::unfold(client_tx, |tx, frame: String| async move {
            tx.unbounded_send(frame)
                .map_err(|_| Error::transport("connection reset by peer"))?;
            Ok::<_, Error>(tx)
        });
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }
}

/// Server side: yields one peer per accepted connection
pub struct MemoryListener {
    rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next connection
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.rx.next().await
    }
}

/// One accepted in-memory connection, seen from the server
pub struct MemoryPeer {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<Result<String>>,
}

impl MemoryPeer {
    /// Next raw frame from the client; `None` once the client hung up
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.incoming.next().await
    }

    /// Next decoded client message
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        let frame = self.recv_frame().await?;
        serde_json::from_str(&frame).ok()
    }

    /// Send a raw frame to the client
    pub fn send_frame(&self, frame: impl Into<String>) -> bool {
        self.outgoing.unbounded_send(Ok(frame.into())).is_ok()
    }

    /// Send a server message to the client
    pub fn send(&self, msg: &ServerMessage) -> bool {
        match serde_json::to_string(msg) {
            Ok(frame) => self.send_frame(frame),
            Err(_) => false,
        }
    }

    /// Deliver a read error to the client, as a broken socket would
    pub fn fail(&self, err: Error) -> bool {
        self.outgoing.unbounded_send(Err(err)).is_ok()
    }

    /// Drop the connection
    pub fn disconnect(self) {}
}

impl std::fmt::Debug for MemoryPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPeer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{authenticate, decode_message, encode_message};

    #[tokio::test]
    async fn test_round_trip_frames() {
        let (connector, mut listener) = MemoryConnector::new();
        let (mut sink, mut source) = connector.connect("http://memory").await.unwrap();
        let mut peer = listener.accept().await.unwrap();

        sink.send(encode_message(&authenticate(1, "t")).unwrap())
            .await
            .unwrap();
        assert!(matches!(
            peer.recv().await,
            Some(ClientMessage::Authenticate { id: 1, .. })
        ));

        peer.send(&ServerMessage::Authenticated { id: Some(1) });
        let frame = source.next().await.unwrap().unwrap();
        assert_eq!(
            decode_message(&frame).unwrap(),
            ServerMessage::Authenticated { id: Some(1) }
        );
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_ends_source() {
        let (connector, mut listener) = MemoryConnector::new();
        let (_sink, mut source) = connector.connect("http://memory").await.unwrap();
        listener.accept().await.unwrap().disconnect();

        assert!(source.next().await.is_none());
    }

    #[tokio::test]
    async fn test_refusing() {
        let (connector, _listener) = MemoryConnector::new();
        connector.set_refusing(true);
        let err = match connector.connect("http://memory").await {
            Ok(_) => panic!("connect should be refused"),
            Err(e) => e,
        };
        assert_eq!(err.hint(), Some("scope server not running at http://memory?"));
        assert_eq!((connector.attempts(), connector.connects()), (1, 0));
    }
}
