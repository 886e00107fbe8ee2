//! Connection management
//!
//! This module handles:
//! * Transport abstraction (WebSocket vs in-memory)
//! * Session lifecycle (open, authenticate, reconnect, close)
//! * State machine enforcement
//! * TLS configuration and support

mod memory;
mod session;
mod state;
mod tls;
mod transport;

pub use memory::{MemoryConnector, MemoryListener, MemoryPeer};
pub use session::{ReconnectPolicy, SessionEvent, TransportSession};
pub use state::SessionState;
pub use tls::{RootSource, TlsConfig, TlsConfigBuilder};
pub use transport::{socket_url, Connector, FrameSink, FrameSource, WebSocketConnector};
