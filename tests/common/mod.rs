//! Shared fixtures: a scripted token service and an in-memory harness

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use scope_client::auth::{TokenGrant, TokenService};
use scope_client::connection::{MemoryConnector, MemoryListener, MemoryPeer};
use scope_client::protocol::{ClientMessage, ServerMessage};
use scope_client::{Client, ClientConfig, ClientEvent, ConnectionIdentity, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Issues `token-N` with scripted validity; 3600s once the script runs out
#[derive(Default)]
pub struct ScriptedTokens {
    validity: Mutex<Vec<i64>>,
    issued: Mutex<Vec<String>>,
    revoked: Mutex<Vec<String>>,
    calls: Mutex<usize>,
    gates: Mutex<HashMap<usize, Gate>>,
}

/// Holds one `issue` call until opened
#[derive(Clone, Default)]
pub struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gate {
    /// Wait until the held call has started
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the held call finish
    pub fn open(&self) {
        self.release.notify_one();
    }
}

impl ScriptedTokens {
    pub fn new(validity: &[i64]) -> Arc<Self> {
        Arc::new(Self {
            validity: Mutex::new(validity.iter().rev().copied().collect()),
            ..Default::default()
        })
    }

    pub fn issued(&self) -> Vec<String> {
        self.issued.lock().clone()
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().clone()
    }

    /// Block the `n`th issue call (1-based) until the gate opens
    pub fn hold(&self, n: usize) -> Gate {
        let gate = Gate::default();
        self.gates.lock().insert(n, gate.clone());
        gate
    }
}

#[async_trait]
impl TokenService for ScriptedTokens {
    async fn issue(&self, _identity: &ConnectionIdentity) -> Result<TokenGrant> {
        let call = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls
        };
        let gate = self.gates.lock().remove(&call);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let secs = self.validity.lock().pop().unwrap_or(3600);
        let mut issued = self.issued.lock();
        let token = format!("token-{}", issued.len() + 1);
        issued.push(token.clone());
        let now = Utc::now();
        Ok(TokenGrant {
            token,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(secs),
        })
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        self.revoked.lock().push(token.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub client: Client,
    pub tokens: Arc<ScriptedTokens>,
    pub connector: MemoryConnector,
    pub listener: MemoryListener,
}

pub fn harness(identity: ConnectionIdentity, config: ClientConfig, validity: &[i64]) -> Harness {
    let tokens = ScriptedTokens::new(validity);
    let (connector, listener) = MemoryConnector::new();
    let client = Client::builder(identity)
        .config(config)
        .token_service(tokens.clone())
        .connector(Arc::new(connector.clone()))
        .build()
        .unwrap();
    Harness {
        client,
        tokens,
        connector,
        listener,
    }
}

pub fn config() -> ClientConfig {
    ClientConfig::builder().build()
}

/// A harness whose client is already readable
pub async fn readable(identity: ConnectionIdentity) -> (Harness, MemoryPeer) {
    let mut harness = harness(identity, config(), &[]);
    let peer = accept_and_authenticate(&mut harness.listener).await;
    harness.client.ready().await.unwrap();
    (harness, peer)
}

/// Wait for an `authenticate` message and return its generation and token
pub async fn expect_authenticate(peer: &mut MemoryPeer) -> (u64, String) {
    match peer.recv().await {
        Some(ClientMessage::Authenticate { id, data }) => (id, data.token),
        other => panic!("expected authenticate, got {:?}", other),
    }
}

pub async fn accept_and_authenticate(listener: &mut MemoryListener) -> MemoryPeer {
    let mut peer = listener.accept().await.unwrap();
    let (id, _) = expect_authenticate(&mut peer).await;
    peer.send(&ServerMessage::Authenticated { id: Some(id) });
    peer
}

pub async fn wait_for_event(
    events: &mut tokio::sync::broadcast::Receiver<ClientEvent>,
    want: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    loop {
        let event = events.recv().await.unwrap();
        if want(&event) {
            return event;
        }
    }
}
