//! Client integration tests over the in-memory transport
//!
//! The persistent channel is played by a `MemoryPeer`, tokens come from a
//! scripted `TokenService`, and HTTP reads go to a wiremock server.

mod common;

use common::{
    accept_and_authenticate, config, expect_authenticate, harness, init_tracing, wait_for_event,
    Harness, ScriptedTokens,
};
use futures::StreamExt;
use scope_client::connection::{MemoryConnector, ReconnectPolicy};
use scope_client::protocol::{ClientMessage, ServerMessage};
use scope_client::{
    Client, ClientConfig, ClientEvent, ConnectionIdentity, Error, InstanceCache, Params,
    Readiness, Value,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_pending, task};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_pending_read_released_on_authentication() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/localhost:27017"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"host":"localhost","build":{"version":"7.0.2"}}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let identity = ConnectionIdentity::default()
        .with_endpoint(&server.uri())
        .unwrap();
    let Harness {
        client,
        mut listener,
        ..
    } = harness(identity, config(), &[]);

    let params = Params::new();
    let mut read = task::spawn(client.read("/", &params));
    assert_pending!(read.poll());

    let mut peer = listener.accept().await.unwrap();
    let (id, token) = expect_authenticate(&mut peer).await;
    assert_eq!((id, token.as_str()), (1, "token-1"));
    assert_pending!(read.poll());

    peer.send(&ServerMessage::Authenticated { id: Some(1) });
    let instance = read.await.unwrap();
    assert_eq!(instance.get("host").and_then(Value::as_str), Some("localhost"));
    assert!(client.readiness().is_readable());

    client.close().await;
}

#[tokio::test]
async fn test_concurrent_get_or_create_shares_one_client() {
    let cache = InstanceCache::new();
    let config = ClientConfig::builder().autoconnect(false).build();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_create("localhost:27017".parse().unwrap(), config)
                .unwrap()
        }));
    }
    let clients: Vec<Client> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(cache.len(), 1);
    assert!(clients.iter().all(|c| c.ptr_eq(&clients[0])));

    clients[0].close().await;
    assert!(cache.is_empty());

    let fresh = cache
        .get_or_create("localhost:27017".parse().unwrap(), config)
        .unwrap();
    assert!(!fresh.ptr_eq(&clients[0]));
    cache.reset().await;
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_token_expiring_too_soon_kills_client() {
    let Harness {
        client, connector, ..
    } = harness(ConnectionIdentity::default(), config(), &[30]);
    let mut events = client.events();

    let err = client.ready().await.unwrap_err();
    assert!(matches!(err, Error::ExpiryTooSoon { .. }));
    assert!(matches!(client.readiness(), Readiness::Dead(_)));
    assert!(matches!(
        events.recv().await.unwrap(),
        ClientEvent::Error(Error::ExpiryTooSoon { .. })
    ));
    assert_eq!(connector.connects(), 0, "no socket without a usable token");

    let read = client.read("/", &Params::new()).await;
    assert!(matches!(read, Err(Error::ExpiryTooSoon { .. })));

    client.close().await;
    assert!(matches!(client.readiness(), Readiness::Dead(_)));
}

#[tokio::test]
async fn test_unauthorized_kills_client_and_fails_pending() {
    let Harness {
        client,
        mut listener,
        ..
    } = harness(ConnectionIdentity::default(), config(), &[]);
    let mut stream = client.create_read_stream("collection:sample", &Value::Null);

    let mut peer = listener.accept().await.unwrap();
    expect_authenticate(&mut peer).await;
    peer.send(&ServerMessage::Unauthorized {
        data: scope_client::protocol::ErrorData {
            message: "bad token".into(),
        },
    });

    assert!(matches!(client.ready().await, Err(Error::Auth(m)) if m == "bad token"));
    assert!(matches!(stream.next().await, Some(Err(Error::Auth(_)))));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_pending_reads_delivered_once_across_reconnects() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/localhost:27017"))
        .and(header("authorization", "Bearer token-3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":1}"#))
        .expect(1)
        .mount(&server)
        .await;

    // Backoff sleeps run on the paused clock
    tokio::time::pause();
    let identity = ConnectionIdentity::default()
        .with_endpoint(&server.uri())
        .unwrap();
    let Harness {
        client,
        tokens,
        mut listener,
        ..
    } = harness(identity, config(), &[]);
    let params = Params::new();
    let mut read = task::spawn(client.read("/", &params));
    assert_pending!(read.poll());
    let stream = client.create_read_stream("collection:sample", &Value::Null);

    // Two connections die before acknowledging; each reconnect re-authenticates
    // with a fresh token
    for expected in 1..=2u64 {
        let mut peer = listener.accept().await.unwrap();
        let (id, token) = expect_authenticate(&mut peer).await;
        assert_eq!(id, expected);
        assert_eq!(token, format!("token-{}", expected));
        assert!(!client.readiness().is_readable());
        assert_pending!(read.poll());
        peer.disconnect();
    }

    let mut peer = listener.accept().await.unwrap();
    let (id, _) = expect_authenticate(&mut peer).await;
    assert_eq!(id, 3);
    assert_eq!(tokens.issued().len(), 3);
    peer.send(&ServerMessage::Authenticated { id: Some(3) });

    let stream_id = match peer.recv().await {
        Some(ClientMessage::StreamOpen { stream, name, .. }) => {
            assert_eq!(name, "collection:sample");
            stream
        }
        other => panic!("expected stream:open, got {:?}", other),
    };
    peer.send(&ServerMessage::StreamData {
        stream: stream_id,
        chunk: "[\n{\"_id\":1}".into(),
    });
    peer.send(&ServerMessage::StreamData {
        stream: stream_id,
        chunk: "\n]\n".into(),
    });
    peer.send(&ServerMessage::StreamEnd { stream: stream_id });

    let docs: Vec<_> = stream.collect().await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].as_ref().unwrap().get("_id").and_then(Value::as_i64), Some(1));

    tokio::time::resume();
    let ok = read.await.unwrap();
    assert_eq!(ok.get("ok").and_then(Value::as_i64), Some(1));

    client.close().await;
    // Exactly one stream:open was ever sent
    while let Some(msg) = peer.recv().await {
        assert!(!matches!(msg, ClientMessage::StreamOpen { .. }));
    }
}

#[tokio::test(start_paused = true)]
async fn test_refresh_precedes_reauthentication() {
    let config = ClientConfig::builder()
        .min_token_validity(Duration::from_secs(60))
        .refresh_redline(Duration::from_secs(15))
        .build();
    let Harness {
        client,
        tokens,
        mut listener,
        ..
    } = harness(ConnectionIdentity::default(), config, &[75]);
    let mut events = client.events();

    let mut peer = accept_and_authenticate(&mut listener).await;
    client.ready().await.unwrap();

    // Timer fires 15s before expiry; the new token exists before it is presented
    let (id, token) = expect_authenticate(&mut peer).await;
    assert_eq!((id, token.as_str()), (2, "token-2"));
    assert_eq!(tokens.issued(), vec!["token-1", "token-2"]);
    assert!(matches!(client.readiness(), Readiness::Reauthenticating));
    assert!(matches!(
        wait_for_event(&mut events, |e| matches!(e, ClientEvent::TokenRefreshed { .. })).await,
        ClientEvent::TokenRefreshed { generation: 2 }
    ));

    // Not readable in the gap: streams queue instead of opening
    let mut stream = client.create_read_stream("collection:sample", &Value::Null);
    peer.send(&ServerMessage::Authenticated { id: Some(2) });
    let stream_id = match peer.recv().await {
        Some(ClientMessage::StreamOpen { stream, .. }) => stream,
        other => panic!("expected stream:open, got {:?}", other),
    };
    assert!(client.readiness().is_readable());

    peer.send(&ServerMessage::StreamEnd { stream: stream_id });
    assert!(stream.next().await.is_none());

    for _ in 0..10 {
        if tokens.revoked().contains(&"token-1".to_string()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(tokens.revoked(), vec!["token-1"]);

    client.close().await;
}

#[tokio::test]
async fn test_stale_ack_does_not_make_client_readable() {
    let Harness {
        client,
        mut listener,
        ..
    } = harness(ConnectionIdentity::default(), config(), &[]);
    let mut peer = listener.accept().await.unwrap();
    expect_authenticate(&mut peer).await;

    peer.send(&ServerMessage::Authenticated { id: Some(7) });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!client.readiness().is_readable());

    peer.send(&ServerMessage::Authenticated { id: Some(1) });
    client.ready().await.unwrap();
    client.close().await;
}

#[tokio::test]
async fn test_close_fails_pending_and_revokes_token() {
    let cache = InstanceCache::new();
    let tokens = ScriptedTokens::new(&[]);
    let (connector, mut listener) = MemoryConnector::new();
    let client = cache
        .get_or_create_with(ConnectionIdentity::default(), |identity| {
            Client::builder(identity)
                .token_service(tokens.clone())
                .connector(Arc::new(connector.clone()))
                .build()
        })
        .unwrap();
    let mut events = client.events();

    let mut peer = listener.accept().await.unwrap();
    expect_authenticate(&mut peer).await;

    let params = Params::new();
    let mut read = task::spawn(client.read("/", &params));
    assert_pending!(read.poll());
    let mut stream = client.create_read_stream("collection:sample", &Value::Null);

    let other = client.clone();
    tokio::join!(client.close(), other.close());

    assert!(matches!(read.await, Err(Error::Closed)));
    assert!(matches!(stream.next().await, Some(Err(Error::Closed))));
    assert!(matches!(client.readiness(), Readiness::Closed));
    assert!(cache.is_empty());
    assert_eq!(tokens.revoked(), vec!["token-1"]);
    assert!(matches!(
        wait_for_event(&mut events, |e| matches!(e, ClientEvent::Closed)).await,
        ClientEvent::Closed
    ));
    assert!(peer.recv().await.is_none(), "socket closed");

    client.close().await;
    assert!(matches!(
        client.read("/", &Params::new()).await,
        Err(Error::Closed)
    ));
}

#[tokio::test]
async fn test_stream_framing_error_surfaces_once() {
    let Harness {
        client,
        mut listener,
        ..
    } = harness(ConnectionIdentity::default(), config(), &[]);
    let mut peer = accept_and_authenticate(&mut listener).await;
    client.ready().await.unwrap();

    let mut stream = client.create_read_stream("collection:sample", &Value::Null);
    let stream_id = match peer.recv().await {
        Some(ClientMessage::StreamOpen { stream, .. }) => stream,
        other => panic!("expected stream:open, got {:?}", other),
    };
    peer.send(&ServerMessage::StreamData {
        stream: stream_id,
        chunk: "[\n{\"n\":1}".into(),
    });
    peer.send(&ServerMessage::StreamData {
        stream: stream_id,
        chunk: "garbage".into(),
    });

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.get("n").and_then(Value::as_i64), Some(1));
    assert!(matches!(
        stream.next().await,
        Some(Err(Error::Framing { raw })) if raw == b"garbage"
    ));
    assert!(stream.next().await.is_none());

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhaustion_kills_client() {
    let config = ClientConfig::builder()
        .reconnect(ReconnectPolicy::default().max_attempts(2))
        .build();
    let Harness {
        client,
        connector,
        mut listener,
        ..
    } = harness(ConnectionIdentity::default(), config, &[]);
    let mut events = client.events();

    let peer = accept_and_authenticate(&mut listener).await;
    client.ready().await.unwrap();

    connector.set_refusing(true);
    peer.disconnect();

    assert!(matches!(
        wait_for_event(&mut events, |e| matches!(e, ClientEvent::Disconnected)).await,
        ClientEvent::Disconnected
    ));
    let attempts: Vec<u32> = {
        let mut attempts = Vec::new();
        loop {
            match events.recv().await.unwrap() {
                ClientEvent::Reconnecting { attempt } => attempts.push(attempt),
                ClientEvent::ReconnectFailed(_) => break,
                _ => {}
            }
        }
        attempts
    };
    assert_eq!(attempts, vec![1, 2]);

    let err = client.ready().await.unwrap_err();
    assert!(matches!(err, Error::Transport { .. }));
    assert!(matches!(
        client.read("/", &Params::new()).await,
        Err(Error::Transport { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_readable_client_reauthenticates_after_reconnect() {
    let (harness, peer) = common::readable(ConnectionIdentity::default()).await;
    let Harness {
        client,
        tokens,
        mut listener,
        ..
    } = harness;
    let mut events = client.events();

    peer.disconnect();
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Disconnected)).await;
    assert!(!client.readiness().is_readable());

    // The replacement token exists before it is presented
    let mut peer = listener.accept().await.unwrap();
    let (id, token) = expect_authenticate(&mut peer).await;
    assert_eq!((id, token.as_str()), (2, "token-2"));
    assert_eq!(tokens.issued(), vec!["token-1", "token-2"]);

    let mut ready = task::spawn(client.ready());
    assert_pending!(ready.poll());
    assert!(!client.readiness().is_readable());

    peer.send(&ServerMessage::Authenticated { id: Some(2) });
    ready.await.unwrap();
    assert!(client.readiness().is_readable());

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_socket_drop_during_token_refresh_is_recovered() {
    let Harness {
        client,
        tokens,
        connector,
        mut listener,
    } = harness(ConnectionIdentity::default(), config(), &[]);
    let gate = tokens.hold(2);

    let peer = accept_and_authenticate(&mut listener).await;
    client.ready().await.unwrap();
    let mut events = client.events();

    // Reconnect triggers a refresh that stalls in the token service
    peer.disconnect();
    let peer = listener.accept().await.unwrap();
    gate.entered().await;

    // Socket drops again while the refresh is in flight
    connector.set_refusing(true);
    let attempts = connector.attempts();
    peer.disconnect();
    while connector.attempts() == attempts {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    gate.open();
    assert!(matches!(
        wait_for_event(&mut events, |e| matches!(e, ClientEvent::TokenRefreshed { .. })).await,
        ClientEvent::TokenRefreshed { generation: 2 }
    ));
    assert!(matches!(client.readiness(), Readiness::Reauthenticating));

    connector.set_refusing(false);
    let mut peer = listener.accept().await.unwrap();
    let (id, token) = expect_authenticate(&mut peer).await;
    assert_eq!((id, token.as_str()), (3, "token-3"));
    assert!(!matches!(client.readiness(), Readiness::Dead(_)));

    peer.send(&ServerMessage::Authenticated { id: Some(3) });
    client.ready().await.unwrap();
    assert_eq!(tokens.issued(), vec!["token-1", "token-2", "token-3"]);

    client.close().await;
}
