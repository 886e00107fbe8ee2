//! Instance cache: at most one live client per connection identity

use super::config::ClientConfig;
use super::connection_string::ConnectionIdentity;
use super::scope_client::{Client, ClientInner};
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Clients keyed by connection identity
///
/// Owned by application state; a client removes itself when closed.
/// There is no other eviction.
pub struct InstanceCache {
    me: Weak<InstanceCache>,
    clients: Mutex<HashMap<ConnectionIdentity, Client>>,
}

impl InstanceCache {
    /// Create an empty cache
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// Cached client for `identity`, creating one with `config` on a miss
    pub fn get_or_create(&self, identity: ConnectionIdentity, config: ClientConfig) -> Result<Client> {
        self.get_or_create_with(identity, |identity| Client::new(identity, config))
    }

    /// Cached client for `identity`, creating one with `create` on a miss
    ///
    /// Lookup and insertion happen under one lock, so concurrent callers
    /// with equal identities always receive the same client.
    pub fn get_or_create_with<F>(&self, identity: ConnectionIdentity, create: F) -> Result<Client>
    where
        F: FnOnce(ConnectionIdentity) -> Result<Client>,
    {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&identity) {
            tracing::debug!(client = %identity.id(), "reusing cached client");
            return Ok(client.clone());
        }

        let client = create(identity.clone())?;
        client.attach_cache(self.me.clone());
        tracing::debug!(client = %identity.id(), "cached new client");
        clients.insert(identity, client.clone());
        Ok(client)
    }

    /// Cached client for `identity`
    pub fn get(&self, identity: &ConnectionIdentity) -> Option<Client> {
        self.clients.lock().get(identity).cloned()
    }

    /// Remove and return the client for `identity` without closing it
    pub fn remove(&self, identity: &ConnectionIdentity) -> Option<Client> {
        self.clients.lock().remove(identity)
    }

    /// Drop the slot of a closing client, unless it was already replaced
    pub(crate) fn release(&self, identity: &ConnectionIdentity, inner: &ClientInner) {
        let released = {
            let mut clients = self.clients.lock();
            if clients.get(identity).map_or(false, |c| c.is(inner)) {
                clients.remove(identity)
            } else {
                None
            }
        };
        // Dropped outside the lock: it may be the last handle
        drop(released);
    }

    /// Identities of all cached clients
    pub fn keys(&self) -> Vec<ConnectionIdentity> {
        self.clients.lock().keys().cloned().collect()
    }

    /// Number of cached clients
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Close every cached client and empty the cache
    pub async fn reset(&self) {
        let clients: Vec<Client> = self.clients.lock().drain().map(|(_, c)| c).collect();
        tracing::debug!(clients = clients.len(), "resetting instance cache");
        futures::future::join_all(clients.iter().map(Client::close)).await;
    }
}

impl std::fmt::Debug for InstanceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceCache")
            .field("clients", &self.len())
            .finish()
    }
}
