//! Query helpers
//!
//! Thin wrappers over [`Client::read`] and [`Client::create_read_stream`].
//! Object-valued options travel as extended JSON text.
//! [`Client::find_stream`] walks a query page by page over HTTP.

use super::namespace::Namespace;
use super::scope_client::Client;
use crate::ejson::{Document, Value};
use crate::http::Params;
use crate::stream::DocumentStream;
use crate::{Error, Result};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

/// Name of the server-side sampling stream
pub const SAMPLE_STREAM: &str = "collection:sample";

/// Most documents the server returns for one `find`
pub const FIND_PAGE_MAX: u32 = 200;

/// Options of [`Client::find`]
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Filter (default `{}`)
    pub query: Option<Document>,
    /// Maximum documents returned (server default 10, max 200)
    pub limit: Option<u32>,
    /// Documents to skip
    pub skip: Option<u32>,
    /// Return the query plan instead of documents
    pub explain: bool,
    /// `{key: 1 | -1}` sort spec
    pub sort: Option<Document>,
    /// Projection
    pub fields: Option<Document>,
    /// Extra cursor options
    pub options: Option<Document>,
    /// Cursor batch size
    pub batch_size: Option<u32>,
}

impl FindOptions {
    fn to_params(&self) -> Params {
        let mut params = Params::new();
        if let Some(limit) = self.limit {
            params.set("limit", limit.to_string());
        }
        if let Some(skip) = self.skip {
            params.set("skip", skip.to_string());
        }
        if self.explain {
            params.set("explain", "true");
        }
        set_document(&mut params, "query", &self.query);
        set_document(&mut params, "sort", &self.sort);
        set_document(&mut params, "fields", &self.fields);
        set_document(&mut params, "options", &self.options);
        if let Some(batch_size) = self.batch_size {
            params.set("batchSize", batch_size.to_string());
        }
        params
    }
}

/// Options of [`Client::count`]
#[derive(Debug, Clone, Default)]
pub struct CountOptions {
    /// Filter (default `{}`)
    pub query: Option<Document>,
    /// Documents to skip
    pub skip: Option<u32>,
    /// Return the query plan instead of the count
    pub explain: bool,
    /// Extra cursor options
    pub options: Option<Document>,
    /// Cursor batch size
    pub batch_size: Option<u32>,
}

impl CountOptions {
    fn to_params(&self) -> Params {
        let mut params = Params::new();
        params.set_value(
            "query",
            &Value::Document(self.query.clone().unwrap_or_default()),
        );
        params.set("skip", self.skip.unwrap_or(0).to_string());
        params.set("explain", self.explain.to_string());
        params.set_value("options", &Value::from(self.options.clone()));
        params.set_value("batchSize", &Value::from(self.batch_size.map(u64::from)));
        params
    }
}

/// Options of [`Client::aggregate`]
#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    /// Return the plan instead of results
    pub explain: bool,
    /// Let stages spill to disk
    pub allow_disk_use: Option<bool>,
    /// Cursor options
    pub cursor: Option<Document>,
}

/// Options of [`Client::sample`] and [`Client::sample_stream`]
#[derive(Debug, Clone, Default)]
pub struct SampleOptions {
    /// Number of documents (server default 5)
    pub size: Option<u32>,
    /// Restrict the sample to matching documents
    pub query: Option<Document>,
    /// Server-side time limit in milliseconds
    pub max_time_ms: Option<u64>,
}

impl SampleOptions {
    fn to_params(&self) -> Params {
        let mut params = Params::new();
        if let Some(size) = self.size {
            params.set("size", size.to_string());
        }
        set_document(&mut params, "query", &self.query);
        if let Some(ms) = self.max_time_ms {
            params.set("maxTimeMS", ms.to_string());
        }
        params
    }

    fn to_stream_options(&self, ns: &Namespace) -> Value {
        let mut options = Document::new().with("ns", ns.to_string());
        if let Some(size) = self.size {
            options.insert("size", u64::from(size));
        }
        if let Some(query) = &self.query {
            options.insert("query", query.clone());
        }
        if let Some(ms) = self.max_time_ms {
            options.insert("maxTimeMS", ms);
        }
        Value::Document(options)
    }
}

/// Paging state of [`Client::find_stream`]
struct FindCursor {
    client: Client,
    path: String,
    options: FindOptions,
    fetched: u32,
    exhausted: bool,
}

impl FindCursor {
    fn page_size(&self) -> Option<u32> {
        let page = self
            .options
            .batch_size
            .unwrap_or(FIND_PAGE_MAX)
            .clamp(1, FIND_PAGE_MAX);
        match self.options.limit {
            Some(limit) if self.fetched >= limit => None,
            Some(limit) => Some(page.min(limit - self.fetched)),
            None => Some(page),
        }
    }

    async fn next_page(&mut self) -> Result<Option<Vec<Value>>> {
        if self.exhausted {
            return Ok(None);
        }
        let Some(want) = self.page_size() else {
            return Ok(None);
        };

        let mut options = self.options.clone();
        options.limit = Some(want);
        options.skip = Some(self.options.skip.unwrap_or(0) + self.fetched);
        let docs = match self.client.read(&self.path, &options.to_params()).await? {
            Value::Array(docs) => docs,
            // explain output and other single replies
            other => {
                self.exhausted = true;
                return Ok(Some(vec![other]));
            }
        };

        let got = u32::try_from(docs.len()).unwrap_or(u32::MAX);
        tracing::trace!(path = %self.path, skip = ?options.skip, got, "find page");
        self.fetched = self.fetched.saturating_add(got);
        if got < want {
            self.exhausted = true;
        }
        Ok(Some(docs))
    }
}

fn set_document(params: &mut Params, key: &str, doc: &Option<Document>) {
    if let Some(doc) = doc {
        params.set_value(key, &Value::Document(doc.clone()));
    }
}

impl Client {
    /// Instance details
    pub async fn instance(&self) -> Result<Value> {
        self.read("/", &Params::new()).await
    }

    /// Known deployments
    pub async fn deployments(&self) -> Result<Value> {
        self.read("/deployments", &Params::new()).await
    }

    /// Run a query on `ns`
    pub async fn find(&self, ns: &str, options: &FindOptions) -> Result<Value> {
        let ns = Namespace::parse(ns)?;
        self.read(&format!("/collections/{}/find", ns), &options.to_params())
            .await
    }

    /// Stream the documents of a query on `ns`
    ///
    /// Fetches pages of `batch_size` documents (at most
    /// [`FIND_PAGE_MAX`]) advancing `skip`, until a short page or until
    /// `limit` documents in total. An invalid namespace or a failed page
    /// ends the stream with that error.
    pub fn find_stream(
        &self,
        ns: &str,
        options: &FindOptions,
    ) -> BoxStream<'static, Result<Value>> {
        let ns = match Namespace::parse(ns) {
            Ok(ns) => ns,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        let cursor = FindCursor {
            client: self.clone(),
            path: format!("/collections/{}/find", ns),
            options: options.clone(),
            fetched: 0,
            exhausted: false,
        };

        stream::try_unfold(cursor, |mut cursor| async move {
            let page = cursor.next_page().await?;
            Ok::<_, Error>(page.map(|docs| {
                let docs = stream::iter(docs.into_iter().map(Ok::<_, Error>));
                (docs, cursor)
            }))
        })
        .try_flatten()
        .boxed()
    }

    /// Count documents of `ns`
    pub async fn count(&self, ns: &str, options: &CountOptions) -> Result<Value> {
        let ns = Namespace::parse(ns)?;
        self.read(&format!("/collections/{}/count", ns), &options.to_params())
            .await
    }

    /// Run an aggregation pipeline on `ns`
    pub async fn aggregate(
        &self,
        ns: &str,
        pipeline: &[Document],
        options: &AggregateOptions,
    ) -> Result<Value> {
        let ns = Namespace::parse(ns)?;
        let stages: Vec<Value> = pipeline.iter().cloned().map(Value::Document).collect();

        let mut params = Params::new();
        params.set_value("pipeline", &Value::Array(stages));
        params.set("explain", options.explain.to_string());
        params.set_value("allowDiskUse", &Value::from(options.allow_disk_use));
        params.set_value("cursor", &Value::from(options.cursor.clone()));
        self.read(&format!("/collections/{}/aggregate", ns), &params)
            .await
    }

    /// Sample documents of `ns`
    pub async fn sample(&self, ns: &str, options: &SampleOptions) -> Result<Value> {
        let ns = Namespace::parse(ns)?;
        self.read(&format!("/collections/{}/sample", ns), &options.to_params())
            .await
    }

    /// Sample documents of `ns` over the socket
    ///
    /// An invalid namespace yields the error from the stream.
    pub fn sample_stream(&self, ns: &str, options: &SampleOptions) -> DocumentStream {
        match Namespace::parse(ns) {
            Ok(ns) => self.create_read_stream(SAMPLE_STREAM, &options.to_stream_options(&ns)),
            Err(e) => DocumentStream::failed(SAMPLE_STREAM, e),
        }
    }

    /// One sampled document of `ns`, if the collection has any
    pub async fn random(&self, ns: &str, options: &SampleOptions) -> Result<Option<Value>> {
        let docs = self.sample(ns, options).await?;
        Ok(match docs {
            Value::Array(mut docs) if !docs.is_empty() => Some(docs.swap_remove(0)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_params() {
        let options = FindOptions {
            query: Some(Document::new().with("age", 30)),
            limit: Some(5),
            ..Default::default()
        };
        let params = options.to_params();
        assert_eq!(params.get("limit"), Some("5"));
        assert_eq!(params.get("query"), Some(r#"{"age":30}"#));
        assert_eq!(params.get("explain"), None);
        assert_eq!(params.get("sort"), None);
    }

    fn cursor(options: FindOptions) -> FindCursor {
        FindCursor {
            client: Client::new(
                crate::client::ConnectionIdentity::default(),
                crate::client::ClientConfig::builder().autoconnect(false).build(),
            )
            .unwrap(),
            path: "/collections/test.users/find".into(),
            options,
            fetched: 0,
            exhausted: false,
        }
    }

    #[tokio::test]
    async fn test_find_page_size() {
        let mut unbounded = cursor(FindOptions::default());
        assert_eq!(unbounded.page_size(), Some(FIND_PAGE_MAX));
        unbounded.fetched = 10_000;
        assert_eq!(unbounded.page_size(), Some(FIND_PAGE_MAX));

        let mut limited = cursor(FindOptions {
            limit: Some(25),
            batch_size: Some(10),
            ..Default::default()
        });
        assert_eq!(limited.page_size(), Some(10));
        limited.fetched = 20;
        assert_eq!(limited.page_size(), Some(5));
        limited.fetched = 25;
        assert_eq!(limited.page_size(), None);

        let oversized = cursor(FindOptions {
            batch_size: Some(5000),
            ..Default::default()
        });
        assert_eq!(oversized.page_size(), Some(FIND_PAGE_MAX));
    }

    #[test]
    fn test_count_params_defaults() {
        let params = CountOptions::default().to_params();
        assert_eq!(params.get("query"), Some("{}"));
        assert_eq!(params.get("skip"), Some("0"));
        assert_eq!(params.get("explain"), Some("false"));
        assert_eq!(params.get("options"), Some("null"));
        assert_eq!(params.get("batchSize"), Some("null"));
    }

    #[test]
    fn test_sample_stream_options() {
        let ns = Namespace::parse("test.users").unwrap();
        let options = SampleOptions {
            size: Some(3),
            ..Default::default()
        }
        .to_stream_options(&ns);
        assert_eq!(
            crate::ejson::inflate(&options),
            serde_json::json!({ "ns": "test.users", "size": 3 })
        );
    }

    #[tokio::test]
    async fn test_sample_stream_invalid_namespace() {
        use futures::StreamExt;

        let client = Client::new(
            crate::client::ConnectionIdentity::default(),
            crate::client::ClientConfig::builder().autoconnect(false).build(),
        )
        .unwrap();
        let mut stream = client.sample_stream("nodot", &SampleOptions::default());
        assert!(matches!(
            stream.next().await,
            Some(Err(crate::Error::InvalidNamespace(_)))
        ));
    }
}
