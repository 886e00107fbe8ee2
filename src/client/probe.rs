//! Connection probe

use super::cache::InstanceCache;
use super::config::ClientConfig;
use super::connection_string::ConnectionIdentity;
use crate::protocol::constants::STALL_TIMEOUT;
use crate::{Error, Result};
use std::time::Duration;

/// Check that a scope server can reach the database of `identity`
///
/// Connects a client through `cache`, waits until it is readable, fails or
/// stalls for 15 seconds, then closes it.
pub async fn test_connection(
    cache: &InstanceCache,
    identity: ConnectionIdentity,
    config: ClientConfig,
) -> Result<()> {
    probe(cache, identity, config, STALL_TIMEOUT).await
}

pub(crate) async fn probe(
    cache: &InstanceCache,
    identity: ConnectionIdentity,
    config: ClientConfig,
    stall: Duration,
) -> Result<()> {
    let id = identity.id();
    let client = cache.get_or_create(identity, config)?;
    client.connect();

    let result = match tokio::time::timeout(stall, client.ready()).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout("client stall detected".into())),
    };
    client.close().await;

    match &result {
        Ok(()) => tracing::info!(client = %id, "connection test passed"),
        Err(e) => tracing::warn!(client = %id, error = %e, "connection test failed"),
    }
    result
}
