//! scope-client: streaming client for the scope document-store proxy
//!
//! A scope server fronts a document database over two channels: a
//! request/response HTTP API and a persistent WebSocket used for
//! authentication and document streams. This crate keeps both channels
//! usable behind one [`Client`]:
//!
//! * a time-limited token is acquired over HTTP and refreshed before it expires
//! * requests wait until the socket has accepted the current token
//! * the socket reconnects with backoff and re-authenticates with a fresh token
//! * document streams are decoded lazily from framed extended JSON
//!
//! # Examples
//!
//! ```ignore
//! use futures::StreamExt;
//! use scope_client::{ClientConfig, ConnectionIdentity, InstanceCache, SampleOptions};
//!
//! let cache = InstanceCache::new();
//! let client = cache.get_or_create("localhost:27017".parse()?, ClientConfig::default())?;
//!
//! let instance = client.instance().await?;
//! let mut docs = client.sample_stream("test.users", &SampleOptions::default());
//! while let Some(doc) = docs.next().await {
//!     println!("{}", doc?);
//! }
//! client.close().await;
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod client;
pub mod connection;
pub mod ejson;
pub mod error;
pub mod http;
pub mod metrics;
pub mod protocol;
pub mod stream;

pub use client::{
    test_connection, Client, ClientBuilder, ClientConfig, ClientEvent, ConnectionIdentity,
    InstanceCache, Readiness, Resource, ResourceKind,
};
pub use client::{AggregateOptions, CountOptions, FindOptions, SampleOptions};
pub use ejson::{Document, ObjectId, Value};
pub use error::{Error, ErrorBody, Result};
pub use http::Params;
pub use stream::DocumentStream;
