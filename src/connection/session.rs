//! Transport session: the persistent socket channel
//!
//! One IO task per open session owns both halves of the socket. Callers talk
//! to it through a command channel and learn about authentication and
//! connectivity changes from the [`SessionEvent`] receiver returned by
//! [`TransportSession::new`].

use super::state::SessionState;
use super::transport::{Connector, FrameSink, FrameSource};
use crate::auth::Token;
use crate::ejson::Value;
use crate::protocol::{
    self, decode_message, encode_message, ClientMessage, ServerMessage, StreamId,
};
use crate::stream::ChunkSender;
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Upper bound on the close handshake when shutting a session down
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Backoff between socket reconnect attempts
///
/// Delays grow from `initial_delay`, doubling per attempt up to `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt (default: 1 second)
    pub initial_delay: Duration,
    /// Cap on the delay (default: 5 seconds)
    pub max_delay: Duration,
    /// Attempts before giving up (default: None, unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Set the first delay
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Give up after `attempts` failed attempts
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay before attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Connectivity and authentication changes of a session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Server accepted the token of this generation
    Authenticated {
        /// Token generation
        generation: u64,
    },
    /// Server rejected the token
    Unauthorized {
        /// Server message
        message: String,
    },
    /// Socket lost; in-flight streams have been failed
    Disconnected {
        /// Cause
        error: Error,
    },
    /// Reconnect attempt about to start
    Reconnecting {
        /// Attempt number, from 1
        attempt: u32,
    },
    /// Socket re-established; the session is connected but not authenticated
    Reconnected,
    /// Reconnect attempts exhausted
    ReconnectFailed {
        /// Last connect error
        error: Error,
    },
}

enum Command {
    Authenticate { generation: u64, token: String },
    Open { stream: StreamId, name: Arc<str>, message: ClientMessage, sink: ChunkSender },
    Shutdown,
}

struct StreamSlot {
    name: Arc<str>,
    sink: ChunkSender,
}

struct IoHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// State shared with the IO task
struct Shared {
    endpoint: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    state: Mutex<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    latest_generation: AtomicU64,
}

impl Shared {
    /// Apply a transition unless the session was closed meanwhile
    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if *state == SessionState::Closed {
            return false;
        }
        match state.transition(next) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "ignored session transition");
                false
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

/// Persistent channel to a scope server
pub struct TransportSession {
    shared: Arc<Shared>,
    io: Mutex<Option<IoHandle>>,
    next_stream: AtomicU64,
}

impl TransportSession {
    /// Create an unopened session and the receiver of its events
    pub fn new(
        endpoint: impl Into<String>,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let session = Self {
            shared: Arc::new(Shared {
                endpoint: endpoint.into(),
                connector,
                policy,
                state: Mutex::new(SessionState::Disconnected),
                events,
                latest_generation: AtomicU64::new(0),
            }),
            io: Mutex::new(None),
            next_stream: AtomicU64::new(1),
        };
        (session, rx)
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// Endpoint of the session
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// Open the socket
    ///
    /// Idempotent: a session that is already opening or open is left alone.
    pub async fn open(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                SessionState::Disconnected => state.transition(SessionState::Connecting)?,
                SessionState::Closed => return Err(Error::Closed),
                _ => return Ok(()),
            }
        }

        let endpoint = self.shared.endpoint.clone();
        let connected = self
            .shared
            .connector
            .connect(&endpoint)
            .instrument(tracing::debug_span!("socket_open", endpoint = %endpoint))
            .await;

        let (sink, source) = match connected {
            Ok(halves) => halves,
            Err(e) => {
                self.shared.transition(SessionState::Disconnected);
                return Err(e);
            }
        };

        if !self.shared.transition(SessionState::Connected) {
            return Err(Error::Closed);
        }
        tracing::debug!(endpoint = %endpoint, "socket open");

        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(
            run(self.shared.clone(), sink, source, rx)
                .instrument(tracing::debug_span!("socket_io", endpoint = %endpoint)),
        );
        *self.io.lock() = Some(IoHandle { commands, task });
        Ok(())
    }

    /// Present a token on the socket
    ///
    /// Returns immediately; the outcome arrives as `Authenticated` or
    /// `Unauthorized`. Only an acknowledgement for this token's generation is
    /// honoured from now on.
    pub fn authenticate(&self, token: &Token) -> Result<()> {
        let generation = token.generation();
        {
            let mut state = self.shared.state.lock();
            match *state {
                SessionState::Connected
                | SessionState::Authenticating
                | SessionState::Authenticated => state.transition(SessionState::Authenticating)?,
                SessionState::Closed => return Err(Error::Closed),
                other => {
                    return Err(Error::InvalidState {
                        expected: "connected".into(),
                        actual: other.to_string(),
                    })
                }
            }
            self.shared
                .latest_generation
                .store(generation, Ordering::SeqCst);
        }

        tracing::debug!(generation, "authenticating socket");
        self.command(Command::Authenticate {
            generation,
            token: token.as_str().to_string(),
        })
    }

    /// Open a named server stream feeding `sink`
    ///
    /// Failures to reach the IO task are delivered through `sink`.
    pub fn open_stream(&self, name: &str, options: &Value, sink: ChunkSender) -> StreamId {
        let stream = self.next_stream.fetch_add(1, Ordering::Relaxed);
        let name: Arc<str> = Arc::from(name);

        if self.state() != SessionState::Authenticated {
            sink.finish(Err(Error::transport(format!(
                "cannot open stream `{}`: socket not authenticated",
                name
            ))));
            return stream;
        }

        let message = protocol::stream_open(stream, &name, options);
        let io = self.io.lock();
        match io.as_ref() {
            Some(io) => {
                if let Err(mpsc::error::SendError(Command::Open { sink, .. })) =
                    io.commands.send(Command::Open {
                        stream,
                        name: name.clone(),
                        message,
                        sink,
                    })
                {
                    sink.finish(Err(Error::transport("socket closed")));
                }
            }
            None => sink.finish(Err(Error::transport("socket not open"))),
        }
        stream
    }

    fn command(&self, command: Command) -> Result<()> {
        let io = self.io.lock();
        let io = io.as_ref().ok_or_else(|| Error::transport("socket not open"))?;
        io.commands
            .send(command)
            .map_err(|_| Error::transport("socket closed"))
    }

    /// Close the socket and fail in-flight streams with `Closed`
    ///
    /// Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state == SessionState::Closed {
                return;
            }
            let _ = state.transition(SessionState::Closed);
        }
        let io = self.io.lock().take();
        if let Some(io) = io {
            let _ = io.commands.send(Command::Shutdown);
            let _ = io.task.await;
        }
        tracing::debug!(endpoint = %self.shared.endpoint, "session closed");
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if let Some(io) = self.io.get_mut().take() {
            io.task.abort();
        }
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

/// IO task: multiplexes commands and incoming frames until shutdown
async fn run(
    shared: Arc<Shared>,
    mut sink: FrameSink,
    mut source: FrameSource,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut streams: HashMap<StreamId, StreamSlot> = HashMap::new();

    loop {
        let lost = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => {
                        fail_streams(&mut streams, || Error::Closed);
                        let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                        return;
                    }
                    Some(command) => {
                        if let Err(e) = execute(&mut sink, &mut streams, command).await {
                            break e;
                        }
                    }
                },
                frame = source.next() => match frame {
                    Some(Ok(text)) => {
                        if let Err(e) = dispatch(&shared, &mut sink, &mut streams, &text).await {
                            break e;
                        }
                    }
                    Some(Err(e)) => break e,
                    None => break Error::transport("socket closed by server"),
                },
            }
        };

        match reconnect(&shared, &mut commands, &mut streams, lost).await {
            Some((new_sink, new_source)) => {
                sink = new_sink;
                source = new_source;
            }
            None => return,
        }
    }
}

/// Send one command's frame; an error means the socket is gone
async fn execute(
    sink: &mut FrameSink,
    streams: &mut HashMap<StreamId, StreamSlot>,
    command: Command,
) -> Result<()> {
    match command {
        Command::Authenticate { generation, token } => {
            sink.send(encode_message(&protocol::authenticate(generation, &token))?)
                .await
        }
        Command::Open {
            stream,
            name,
            message,
            sink: chunks,
        } => {
            let frame = match encode_message(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    chunks.finish(Err(e));
                    return Ok(());
                }
            };
            tracing::debug!(stream, name = %name, "opening stream");
            crate::metrics::counters::stream_opened(&name);
            streams.insert(stream, StreamSlot { name, sink: chunks });
            sink.send(frame).await
        }
        Command::Shutdown => Ok(()),
    }
}

/// Route one incoming frame
async fn dispatch(
    shared: &Shared,
    sink: &mut FrameSink,
    streams: &mut HashMap<StreamId, StreamSlot>,
    text: &str,
) -> Result<()> {
    let message = match decode_message(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "dropping undecodable frame");
            return Ok(());
        }
    };

    match message {
        ServerMessage::Authenticated { id } => {
            let latest = shared.latest_generation.load(Ordering::SeqCst);
            let generation = id.unwrap_or(latest);
            if generation != latest {
                tracing::debug!(generation, latest, "discarding stale authentication ack");
                crate::metrics::counters::auth_stale_ack();
                return Ok(());
            }
            if shared.transition(SessionState::Authenticated) {
                tracing::debug!(generation, "socket authenticated");
                crate::metrics::counters::auth_accepted();
                shared.emit(SessionEvent::Authenticated { generation });
            }
        }
        ServerMessage::Unauthorized { data } => {
            crate::metrics::counters::auth_rejected();
            if shared.transition(SessionState::Connected) {
                shared.emit(SessionEvent::Unauthorized {
                    message: data.message,
                });
            }
        }
        ServerMessage::StreamData { stream, chunk } => {
            let delivered = match streams.get(&stream) {
                Some(slot) => slot.sink.send(chunk.into_bytes()),
                None => {
                    tracing::debug!(stream, "data for unknown stream");
                    return Ok(());
                }
            };
            if !delivered {
                if let Some(slot) = streams.remove(&stream) {
                    tracing::debug!(stream, name = %slot.name, "consumer gone, closing stream");
                }
                sink.send(encode_message(&ClientMessage::StreamClose { stream })?)
                    .await?;
            }
        }
        ServerMessage::StreamEnd { stream } => {
            if let Some(slot) = streams.remove(&stream) {
                slot.sink.finish(Ok(()));
            }
        }
        ServerMessage::StreamError { stream, data } => {
            if let Some(slot) = streams.remove(&stream) {
                tracing::debug!(stream, name = %slot.name, error = %data, "stream failed");
                slot.sink.finish(Err(Error::Remote(data.message)));
            }
        }
        ServerMessage::Other => {}
    }
    Ok(())
}

fn fail_streams(streams: &mut HashMap<StreamId, StreamSlot>, err: impl Fn() -> Error) {
    for (_, slot) in streams.drain() {
        slot.sink.finish(Err(err()));
    }
}

/// Commands arriving while disconnected are discarded; their streams fail
fn discard(command: Command) {
    match command {
        Command::Authenticate { generation, .. } => {
            tracing::debug!(generation, "discarding authenticate while disconnected");
        }
        Command::Open { sink, .. } => {
            sink.finish(Err(Error::transport("socket disconnected")));
        }
        Command::Shutdown => {}
    }
}

/// Reconnect with backoff; `None` on shutdown or when attempts ran out
async fn reconnect(
    shared: &Shared,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    streams: &mut HashMap<StreamId, StreamSlot>,
    cause: Error,
) -> Option<(FrameSink, FrameSource)> {
    if !shared.transition(SessionState::Reconnecting) {
        fail_streams(streams, || Error::Closed);
        return None;
    }
    tracing::warn!(endpoint = %shared.endpoint, error = %cause, "socket lost");
    let message = format!("socket disconnected: {}", cause);
    fail_streams(streams, || Error::transport(message.clone()));
    shared.emit(SessionEvent::Disconnected {
        error: cause.clone(),
    });

    let mut last_error = cause;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if shared
            .policy
            .max_attempts
            .map_or(false, |max| attempt > max)
        {
            tracing::warn!(attempts = attempt - 1, error = %last_error, "giving up reconnecting");
            crate::metrics::counters::reconnect_finished(crate::metrics::labels::OUTCOME_ERROR);
            shared.transition(SessionState::Disconnected);
            shared.emit(SessionEvent::ReconnectFailed { error: last_error });
            return None;
        }

        shared.emit(SessionEvent::Reconnecting { attempt });
        crate::metrics::counters::reconnect_attempted();

        let sleep = tokio::time::sleep(shared.policy.delay(attempt));
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => return None,
                    Some(command) => discard(command),
                },
            }
        }

        let connect = shared.connector.connect(&shared.endpoint);
        tokio::pin!(connect);
        let result = loop {
            tokio::select! {
                result = &mut connect => break result,
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => return None,
                    Some(command) => discard(command),
                },
            }
        };

        match result {
            Ok(halves) => {
                if !shared.transition(SessionState::Connected) {
                    return None;
                }
                tracing::info!(endpoint = %shared.endpoint, attempt, "socket reconnected");
                crate::metrics::counters::reconnect_finished(crate::metrics::labels::OUTCOME_OK);
                shared.emit(SessionEvent::Reconnected);
                return Some(halves);
            }
            Err(e) => {
                tracing::debug!(attempt, error = %e, "reconnect attempt failed");
                last_error = e;
            }
        }
    }
}
