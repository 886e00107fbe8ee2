//! High-level client API
//!
//! A [`Client`] talks to one scope server endpoint about one database
//! instance. Share clients through an [`InstanceCache`].

mod cache;
mod config;
mod connection_string;
mod namespace;
mod probe;
mod query;
mod readiness;
mod resource;
mod scope_client;

pub use cache::InstanceCache;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use connection_string::{
    default_endpoint, normalize_endpoint, normalize_instance_id, ConnectionIdentity,
    ConnectionIdentityBuilder, TokenRequest, DEFAULT_HOST, DEFAULT_PORT,
};
pub use namespace::{is_valid_collection_name, is_valid_database_name, Namespace};
pub use probe::test_connection;
pub use query::{
    AggregateOptions, CountOptions, FindOptions, SampleOptions, FIND_PAGE_MAX, SAMPLE_STREAM,
};
pub use readiness::{ClientEvent, Readiness};
pub use resource::{Resource, ResourceKind};
pub use scope_client::{Client, ClientBuilder};
