//! Scope server client
//!
//! A [`Client`] gates every request on readiness: requests issued before the
//! socket is authenticated wait in an arrival-ordered queue and are released
//! in one batch when the client becomes readable, or failed in one batch when
//! it goes dead or is closed.

use super::cache::InstanceCache;
use super::config::ClientConfig;
use super::connection_string::{normalize_instance_id, ConnectionIdentity};
use super::readiness::{ClientEvent, Readiness};
use crate::auth::{RefreshDue, Token, TokenLease, TokenService};
use crate::connection::{Connector, SessionEvent, TransportSession, WebSocketConnector};
use crate::ejson::Value;
use crate::http::{HttpApi, Params};
use crate::stream::{ChunkSender, DocumentStream};
use crate::{Error, Result};
use parking_lot::Mutex;
use reqwest::Method;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Buffered client events per subscriber
const EVENT_CAPACITY: usize = 64;

/// A request suspended until the client is readable
enum PendingRead {
    Request(oneshot::Sender<Result<Arc<Token>>>),
    Stream {
        name: String,
        options: Value,
        sink: ChunkSender,
    },
}

impl PendingRead {
    fn fail(self, err: Error) {
        match self {
            PendingRead::Request(tx) => {
                let _ = tx.send(Err(err));
            }
            PendingRead::Stream { sink, .. } => sink.finish(Err(err)),
        }
    }
}

struct ClientState {
    readiness: Readiness,
    token: Option<Arc<Token>>,
    session: Option<Arc<TransportSession>>,
    pending: VecDeque<PendingRead>,
    driver: Option<JoinHandle<()>>,
    connect_started: Option<Instant>,
    close_started: bool,
}

pub(crate) struct ClientInner {
    identity: ConnectionIdentity,
    instance_id: String,
    config: ClientConfig,
    http: HttpApi,
    tokens: Arc<dyn TokenService>,
    connector: Arc<dyn Connector>,
    state: Mutex<ClientState>,
    readiness: watch::Sender<Readiness>,
    events: broadcast::Sender<ClientEvent>,
    torn_down: watch::Sender<bool>,
    cache: Mutex<Option<Weak<InstanceCache>>>,
}

/// Client for one scope server endpoint and database instance
///
/// Cheap to clone; clones share the same connection. The connection is torn
/// down by [`close`](Client::close), or once the last handle is dropped.
///
/// # Examples
///
/// ```ignore
/// use scope_client::{Client, ConnectionIdentity, Params};
///
/// let client = Client::new("localhost:27017".parse()?, Default::default())?;
/// let instance = client.read("/", &Params::new()).await?;
/// client.close().await;
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
    _guard: Arc<HandleGuard>,
}

/// Closes the client when the last application handle goes away
struct HandleGuard {
    inner: Weak<ClientInner>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            if inner.begin_close() {
                tracing::debug!(client = %inner.identity.id(), "last handle dropped, closing");
                inner.release_cache_slot();
                inner.torn_down.send_replace(true);
            }
        }
    }
}

/// Builder for [`Client`]
///
/// The token service and socket connector default to the scope server's
/// HTTP token endpoint and a WebSocket connector.
pub struct ClientBuilder {
    identity: ConnectionIdentity,
    config: ClientConfig,
    tokens: Option<Arc<dyn TokenService>>,
    connector: Option<Arc<dyn Connector>>,
}

impl ClientBuilder {
    /// Set the client configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Issue and revoke tokens through `service`
    pub fn token_service(mut self, service: Arc<dyn TokenService>) -> Self {
        self.tokens = Some(service);
        self
    }

    /// Open the persistent channel through `connector`
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Build the client; connects right away when `autoconnect` is set
    ///
    /// Connecting spawns a task, so with `autoconnect` this must be called
    /// from within a Tokio runtime.
    pub fn build(self) -> Result<Client> {
        let http = HttpApi::new(self.identity.endpoint(), &self.config)?;
        let tokens = self
            .tokens
            .unwrap_or_else(|| Arc::new(http.clone()) as Arc<dyn TokenService>);
        let connector = self.connector.unwrap_or_else(|| {
            let mut connector = WebSocketConnector::new();
            if let Some(tls) = &self.config.tls {
                connector = connector.tls(tls.clone());
            }
            if let Some(timeout) = self.config.connect_timeout {
                connector = connector.connect_timeout(timeout);
            }
            Arc::new(connector) as Arc<dyn Connector>
        });

        let instance_id = normalize_instance_id(&self.identity.instance_id());
        let (readiness, _) = watch::channel(Readiness::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (torn_down, _) = watch::channel(false);
        let autoconnect = self.config.autoconnect;

        let inner = Arc::new(ClientInner {
            identity: self.identity,
            instance_id,
            config: self.config,
            http,
            tokens,
            connector,
            state: Mutex::new(ClientState {
                readiness: Readiness::Idle,
                token: None,
                session: None,
                pending: VecDeque::new(),
                driver: None,
                connect_started: None,
                close_started: false,
            }),
            readiness,
            events,
            torn_down,
            cache: Mutex::new(None),
        });
        let client = Client {
            _guard: Arc::new(HandleGuard {
                inner: Arc::downgrade(&inner),
            }),
            inner,
        };
        if autoconnect {
            client.connect();
        }
        Ok(client)
    }
}

impl Client {
    /// Create a client for `identity`
    pub fn new(identity: ConnectionIdentity, config: ClientConfig) -> Result<Self> {
        Self::builder(identity).config(config).build()
    }

    /// Create a builder with the default configuration
    pub fn builder(identity: ConnectionIdentity) -> ClientBuilder {
        ClientBuilder {
            identity,
            config: ClientConfig::default(),
            tokens: None,
            connector: None,
        }
    }

    /// Identity this client was created for
    pub fn identity(&self) -> &ConnectionIdentity {
        &self.inner.identity
    }

    /// Normalized instance id used in request paths
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// Current readiness
    pub fn readiness(&self) -> Readiness {
        self.inner.state.lock().readiness.clone()
    }

    /// Watch readiness changes
    pub fn watch_readiness(&self) -> watch::Receiver<Readiness> {
        self.inner.readiness.subscribe()
    }

    /// Subscribe to client events
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Whether both handles refer to the same client
    pub fn ptr_eq(&self, other: &Client) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn is(&self, inner: &ClientInner) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.inner), inner)
    }

    pub(crate) fn attach_cache(&self, cache: Weak<InstanceCache>) {
        *self.inner.cache.lock() = Some(cache);
    }

    /// Start connecting
    ///
    /// No-op unless the client is idle. Must be called from within a Tokio
    /// runtime.
    pub fn connect(&self) {
        let mut state = self.inner.state.lock();
        if !self.inner.transition(&mut state, Readiness::Connecting) {
            return;
        }
        state.connect_started = Some(Instant::now());
        let span = tracing::info_span!("scope_client", client = %self.inner.identity.id());
        state.driver = Some(tokio::spawn(self.inner.clone().drive().instrument(span)));
    }

    /// Wait until the client is readable
    ///
    /// Fails with the stored error once dead, or `Closed`. Waits indefinitely
    /// on an idle client that is never connected.
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.inner.readiness.subscribe();
        loop {
            let outcome = {
                let readiness = rx.borrow_and_update();
                match &*readiness {
                    Readiness::Readable => Some(Ok(())),
                    other => other.failure().map(Err),
                }
            };
            if let Some(outcome) = outcome {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return Err(Error::Closed);
            }
        }
    }

    /// `GET` a path relative to this client's instance
    ///
    /// `/` maps to the instance itself and `/deployments` is not
    /// instance-prefixed.
    pub async fn read(&self, path: &str, params: &Params) -> Result<Value> {
        self.exec(Method::GET, path, params, None).await
    }

    /// Perform a request once the client is readable
    pub async fn exec(
        &self,
        method: Method,
        path: &str,
        params: &Params,
        body: Option<&Value>,
    ) -> Result<Value> {
        let token = self.inner.wait_token().await?;
        let path = self.inner.route(path);

        let start = Instant::now();
        let result = self
            .inner
            .http
            .send(method.clone(), &path, token.as_str(), params, body)
            .instrument(tracing::debug_span!("request", method = %method, path = %path))
            .await;

        let outcome = match &result {
            Ok(_) => crate::metrics::labels::OUTCOME_OK,
            Err(_) => crate::metrics::labels::OUTCOME_ERROR,
        };
        crate::metrics::counters::request_completed(outcome);
        crate::metrics::histograms::request_duration(outcome, start.elapsed().as_millis() as u64);
        result
    }

    /// Open a named server stream
    ///
    /// Returns immediately. While the client is not readable the returned
    /// stream is a placeholder that starts flowing once the stream is opened
    /// on the authenticated socket; if the client goes dead or is closed first
    /// it yields that error once and ends.
    pub fn create_read_stream(&self, name: &str, options: &Value) -> DocumentStream {
        let (sink, stream) = DocumentStream::channel(name);
        let mut state = self.inner.state.lock();
        if let Some(err) = state.readiness.failure() {
            sink.finish(Err(err));
        } else if state.readiness.is_readable() {
            match &state.session {
                Some(session) => {
                    session.open_stream(name, options, sink);
                }
                None => sink.finish(Err(Error::transport("socket not open"))),
            }
        } else {
            crate::metrics::counters::pending_read_queued();
            state.pending.push_back(PendingRead::Stream {
                name: name.to_string(),
                options: options.clone(),
                sink,
            });
        }
        stream
    }

    /// Close the client
    ///
    /// Fails pending requests with `Closed`, releases the cache slot, closes
    /// the socket and revokes the token. Idempotent; concurrent callers all
    /// wait for the same teardown.
    pub async fn close(&self) {
        let inner = &self.inner;
        if !inner.begin_close() {
            let mut done = inner.torn_down.subscribe();
            loop {
                let finished = *done.borrow_and_update();
                if finished {
                    return;
                }
                if done.changed().await.is_err() {
                    return;
                }
            }
        }

        inner.release_cache_slot();
        let driver = inner.state.lock().driver.take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }
        tracing::info!(client = %inner.identity.id(), "client closed");
        let _ = inner.events.send(ClientEvent::Closed);
        inner.torn_down.send_replace(true);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("identity", &self.inner.identity)
            .field("readiness", &self.readiness())
            .finish()
    }
}

impl ClientInner {
    /// Apply a readiness transition and publish it
    fn transition(&self, state: &mut ClientState, next: Readiness) -> bool {
        match state.readiness.transition(next.clone()) {
            Ok(()) => {
                tracing::debug!(readiness = %next, "readiness changed");
                self.readiness.send_replace(next);
                true
            }
            Err(_) => false,
        }
    }

    /// Mark closed and fail pending requests; `false` if already closing
    fn begin_close(&self) -> bool {
        let mut state = self.state.lock();
        if state.close_started {
            return false;
        }
        state.close_started = true;
        if self.transition(&mut state, Readiness::Closed) {
            for read in std::mem::take(&mut state.pending) {
                read.fail(Error::Closed);
            }
        }
        true
    }

    fn release_cache_slot(&self) {
        let cache = self.cache.lock().take();
        if let Some(cache) = cache.and_then(|c| c.upgrade()) {
            cache.release(&self.identity, self);
        }
    }

    /// Route a request path under this instance
    fn route(&self, path: &str) -> String {
        match path {
            "/" => format!("/{}", self.instance_id),
            "/deployments" => path.to_string(),
            _ => format!("/{}{}", self.instance_id, path),
        }
    }

    /// Current token once readable; queues behind readiness otherwise
    async fn wait_token(&self) -> Result<Arc<Token>> {
        let rx = {
            let mut state = self.state.lock();
            if let Some(err) = state.readiness.failure() {
                return Err(err);
            }
            if state.readiness.is_readable() {
                if let Some(token) = &state.token {
                    return Ok(token.clone());
                }
            }
            let (tx, rx) = oneshot::channel();
            crate::metrics::counters::pending_read_queued();
            state.pending.push_back(PendingRead::Request(tx));
            rx
        };
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Become readable for `generation` and release every pending request
    fn become_readable(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        let token = match &state.token {
            Some(token) if token.generation() == generation => token.clone(),
            _ => {
                tracing::debug!(generation, "ignoring acknowledgement for replaced token");
                return false;
            }
        };
        if !self.transition(&mut state, Readiness::Readable) {
            return false;
        }
        if let Some(started) = state.connect_started.take() {
            let elapsed = started.elapsed().as_millis() as u64;
            crate::metrics::histograms::time_to_readable(elapsed);
            tracing::info!(elapsed_ms = elapsed, "client readable");
        }

        let session = state.session.clone();
        let pending = std::mem::take(&mut state.pending);
        tracing::debug!(released = pending.len(), "releasing pending requests");
        for read in pending {
            match read {
                PendingRead::Request(tx) => {
                    let _ = tx.send(Ok(token.clone()));
                }
                PendingRead::Stream {
                    name,
                    options,
                    sink,
                } => match &session {
                    Some(session) => {
                        session.open_stream(&name, &options, sink);
                    }
                    None => sink.finish(Err(Error::transport("socket not open"))),
                },
            }
        }
        let _ = self.events.send(ClientEvent::Readable);
        true
    }

    /// Hold requests until the next acknowledgement
    fn suspend(&self) {
        let mut state = self.state.lock();
        self.transition(&mut state, Readiness::Reauthenticating);
    }

    /// Go dead: fail pending requests and publish the error once
    fn fail(&self, err: Error) {
        let mut state = self.state.lock();
        if !self.transition(&mut state, Readiness::Dead(err.clone())) {
            return;
        }
        tracing::error!(error = %err, "client dead");
        crate::metrics::counters::client_dead(err.category());
        for read in std::mem::take(&mut state.pending) {
            read.fail(err.clone());
        }
        let _ = self.events.send(ClientEvent::Error(err));
    }

    /// Per-client event loop
    async fn drive(self: Arc<Self>) {
        let mut lease = TokenLease::new(self.tokens.clone(), self.identity.clone())
            .min_validity(self.config.min_token_validity)
            .redline(self.config.refresh_redline);

        let result = tokio::select! {
            _ = wait_closed(self.readiness.subscribe()) => Ok(()),
            result = self.run(&mut lease) => result,
        };
        if let Err(e) = result {
            self.fail(e);
        }

        let session = self.state.lock().session.take();
        if let Some(session) = session {
            session.close().await;
        }
        lease.close().await;
    }

    async fn run(&self, lease: &mut TokenLease) -> Result<()> {
        let token = lease.acquire().await?;
        self.state.lock().token = Some(token.clone());
        let (refresh_tx, mut refresh_rx) = mpsc::unbounded_channel();
        lease.schedule_refresh(refresh_tx.clone());

        let (session, mut events) = TransportSession::new(
            self.identity.endpoint(),
            self.connector.clone(),
            self.config.reconnect.clone(),
        );
        let session = Arc::new(session);
        self.state.lock().session = Some(session.clone());

        session.open().await?;
        let mut auth_deadline = self.present(&session, &token)?;

        loop {
            let deadline = auth_deadline;
            let auth_wait = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = auth_wait => {
                    return Err(Error::Timeout("socket authentication".into()));
                }
                Some(due) = refresh_rx.recv() => {
                    if lease.current().map(|t| t.generation()) != Some(due.generation) {
                        tracing::debug!(generation = due.generation, "ignoring refresh for replaced token");
                        continue;
                    }
                    let token = self.refresh(lease, &refresh_tx).await?;
                    if session.state().is_connected() {
                        self.suspend();
                        if let Some(deadline) = self.present(&session, &token)? {
                            auth_deadline = Some(deadline);
                        }
                    }
                }
                event = events.recv() => match event {
                    None => return Err(Error::transport("socket session ended")),
                    Some(SessionEvent::Authenticated { generation }) => {
                        if self.become_readable(generation) {
                            auth_deadline = None;
                        }
                    }
                    Some(SessionEvent::Unauthorized { message }) => {
                        return Err(Error::Auth(message));
                    }
                    Some(SessionEvent::Disconnected { error }) => {
                        tracing::info!(error = %error, "socket disconnected");
                        self.suspend();
                        auth_deadline = None;
                        let _ = self.events.send(ClientEvent::Disconnected);
                    }
                    Some(SessionEvent::Reconnecting { attempt }) => {
                        let _ = self.events.send(ClientEvent::Reconnecting { attempt });
                    }
                    Some(SessionEvent::Reconnected) => {
                        let token = self.refresh(lease, &refresh_tx).await?;
                        auth_deadline = self.present(&session, &token)?;
                    }
                    Some(SessionEvent::ReconnectFailed { error }) => {
                        let _ = self.events.send(ClientEvent::ReconnectFailed(error.clone()));
                        return Err(error);
                    }
                },
            }
        }
    }

    /// Send `token` on the socket and return the acknowledgement deadline
    ///
    /// The socket may have dropped again while the token was being fetched.
    /// That yields `None`: the pending `Reconnected` event presents a fresh
    /// token. Only a closed session is an error.
    fn present(
        &self,
        session: &TransportSession,
        token: &Token,
    ) -> Result<Option<tokio::time::Instant>> {
        match session.authenticate(token) {
            Ok(()) => Ok(Some(tokio::time::Instant::now() + self.config.auth_timeout)),
            Err(Error::InvalidState { actual, .. }) => {
                tracing::debug!(state = %actual, "socket dropped before authenticate");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the token and re-arm the refresh timer
    async fn refresh(
        &self,
        lease: &mut TokenLease,
        refresh_tx: &mpsc::UnboundedSender<RefreshDue>,
    ) -> Result<Arc<Token>> {
        let token = lease.refresh().await?;
        lease.schedule_refresh(refresh_tx.clone());
        self.state.lock().token = Some(token.clone());
        tracing::info!(generation = token.generation(), "token refreshed");
        let _ = self.events.send(ClientEvent::TokenRefreshed {
            generation: token.generation(),
        });
        Ok(token)
    }
}

async fn wait_closed(mut rx: watch::Receiver<Readiness>) {
    loop {
        let closed = rx.borrow_and_update().is_closed();
        if closed {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
