//! Transport abstraction (WebSocket with optional TLS vs in-memory)
//!
//! A transport is a pair of text-frame halves: a sink for outgoing frames and
//! a source of incoming frames. The source ending means the peer went away.

use super::tls::TlsConfig;
use crate::protocol::constants::SOCKET_PATH;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

/// Outgoing half of a transport
pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Incoming half of a transport
pub type FrameSource = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Opens the persistent channel to a scope server endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect and return both halves of the channel
    async fn connect(&self, endpoint: &str) -> Result<(FrameSink, FrameSource)>;
}

/// WebSocket connector
///
/// `http://` endpoints map to `ws://`, `https://` to `wss://`, both on the
/// socket path.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    tls: Option<TlsConfig>,
    connect_timeout: Option<Duration>,
}

impl WebSocketConnector {
    /// Create a connector with system TLS defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom TLS configuration for `wss://`
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Bound the WebSocket handshake
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<(FrameSink, FrameSource)> {
        let url = socket_url(endpoint)?;
        tracing::debug!(url = %url, "opening socket");

        let connector = self
            .tls
            .as_ref()
            .map(|tls| tokio_tungstenite::Connector::Rustls(tls.client_config()));
        let handshake =
            tokio_tungstenite::connect_async_tls_with_config(url.as_str(), None, false, connector);

        let result = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, handshake)
                .await
                .map_err(|_| Error::Timeout(format!("socket handshake with {}", endpoint)))?,
            None => handshake.await,
        };
        let (ws, _response) = result.map_err(|e| Error::from_channel(e.to_string(), endpoint))?;

        let (write, read) = ws.split();

        let sink = write.with(|text: String| future::ready(Ok::<_, Error>(Message::Text(text))));

        let source_endpoint = endpoint.to_string();
        let source = read.filter_map(move |msg| future::ready(text_frame(msg, &source_endpoint)));

        Ok((Box::pin(sink), Box::pin(source)))
    }
}

fn text_frame(
    msg: std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
    endpoint: &str,
) -> Option<Result<String>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(text)),
        Ok(Message::Binary(bytes)) => Some(
            String::from_utf8(bytes)
                .map_err(|_| Error::Protocol("binary frame is not valid UTF-8".into())),
        ),
        // Control frames; a close is followed by the end of the stream
        Ok(_) => None,
        Err(e) => Some(Err(Error::from_channel(e.to_string(), endpoint))),
    }
}

/// Socket URL for an endpoint
pub fn socket_url(endpoint: &str) -> Result<String> {
    let base = if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        return Err(Error::Config(format!(
            "endpoint `{}` must start with http:// or https://",
            endpoint
        )));
    };
    let url = format!("{}{}", base.trim_end_matches('/'), SOCKET_PATH);
    url::Url::parse(&url)?;
    Ok(url)
}
