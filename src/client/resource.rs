//! Resources: databases, collections, indexes and documents
//!
//! A [`Resource`] is a [`ResourceKind`] plus an id, bound to a client. Every
//! capability goes through the client, so writes are gated on readiness
//! exactly like reads.

use super::namespace::{validate_database_name, Namespace};
use super::scope_client::Client;
use crate::ejson::{Document, Value};
use crate::http::Params;
use crate::Result;
use reqwest::Method;

/// What a resource addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    /// A database; the id is its name
    Database,
    /// A collection; the id is its namespace
    Collection,
    /// An index of a collection; the id is the index name
    Index(Namespace),
    /// A document of a collection; the id is its `_id`
    Document(Namespace),
}

impl ResourceKind {
    /// Collection route, relative to the instance
    fn base(&self) -> String {
        match self {
            ResourceKind::Database => "/databases".to_string(),
            ResourceKind::Collection => "/collections".to_string(),
            ResourceKind::Index(ns) => format!("/indexes/{}", ns),
            ResourceKind::Document(ns) => format!("/documents/{}", ns),
        }
    }
}

/// A server-side resource bound to a client
#[derive(Debug, Clone)]
pub struct Resource {
    client: Client,
    kind: ResourceKind,
    id: String,
}

impl Resource {
    pub(crate) fn new(client: Client, kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            client,
            kind,
            id: id.into(),
        }
    }

    /// Resource kind
    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// Resource id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Route of this resource, relative to the instance
    pub fn path(&self) -> String {
        format!("{}/{}", self.kind.base(), encode_component(&self.id))
    }

    /// Fetch the resource
    pub async fn read(&self, params: &Params) -> Result<Value> {
        self.client.read(&self.path(), params).await
    }

    /// Create the resource
    ///
    /// Databases are created by name and indexes from a field spec; other
    /// kinds post `data` as the new resource.
    pub async fn create(&self, data: Document) -> Result<Value> {
        let (path, body) = match &self.kind {
            ResourceKind::Database => (
                self.kind.base(),
                Document::new().with("database_name", self.id.as_str()),
            ),
            ResourceKind::Index(_) => (self.kind.base(), Document::new().with("field", data)),
            ResourceKind::Document(_) => (self.kind.base(), data),
            ResourceKind::Collection => (self.path(), data),
        };
        self.send(Method::POST, &path, body).await
    }

    /// Update the resource
    ///
    /// For indexes `data` holds the index options.
    pub async fn update(&self, data: Document) -> Result<Value> {
        let (path, body) = match &self.kind {
            ResourceKind::Index(_) => (
                self.kind.base(),
                Document::new()
                    .with("field", self.id.as_str())
                    .with("options", data),
            ),
            _ => (self.path(), data),
        };
        self.send(Method::PUT, &path, body).await
    }

    /// Delete the resource
    pub async fn destroy(&self) -> Result<Value> {
        self.client
            .exec(Method::DELETE, &self.path(), &Params::new(), None)
            .await
    }

    async fn send(&self, method: Method, path: &str, body: Document) -> Result<Value> {
        self.client
            .exec(method, path, &Params::new(), Some(&Value::Document(body)))
            .await
    }
}

impl Client {
    /// A database of this instance
    pub fn database(&self, name: &str) -> Result<Resource> {
        let name = validate_database_name(name)?;
        Ok(Resource::new(self.clone(), ResourceKind::Database, name))
    }

    /// A collection, by `database.collection` namespace
    pub fn collection(&self, ns: &str) -> Result<Resource> {
        let ns = Namespace::parse(ns)?;
        Ok(Resource::new(self.clone(), ResourceKind::Collection, ns.to_string()))
    }

    /// An index of a collection
    pub fn index(&self, ns: &str, name: &str) -> Result<Resource> {
        let ns = Namespace::parse(ns)?;
        Ok(Resource::new(self.clone(), ResourceKind::Index(ns), name))
    }

    /// A document of a collection, by `_id`
    pub fn document(&self, ns: &str, id: &str) -> Result<Resource> {
        let ns = Namespace::parse(ns)?;
        Ok(Resource::new(self.clone(), ResourceKind::Document(ns), id))
    }
}

/// Percent-encode a path segment the way `encodeURIComponent` does
fn encode_component(segment: &str) -> String {
    const KEEP: &[u8] = b"-_.!~*'()";
    let mut out = String::with_capacity(segment.len());
    for &b in segment.as_bytes() {
        if b.is_ascii_alphanumeric() || KEEP.contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}
