//! HTTP request/response channel
//!
//! Every REST call against the scope server goes through [`HttpApi`]: bearer
//! authentication, extended JSON bodies and normalized errors. The token
//! endpoint is served by the same type via [`TokenService`].

mod params;

pub use params::Params;

use crate::auth::{TokenGrant, TokenService};
use crate::client::{ClientConfig, ConnectionIdentity};
use crate::ejson::{self, Value};
use crate::protocol::constants::{API_PREFIX, TOKEN_PATH};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use std::error::Error as _;

/// HTTP channel to one scope server endpoint
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpApi {
    /// Create a channel with the timeouts and TLS roots of `config`
    pub fn new(endpoint: impl Into<String>, config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(tls) = &config.tls {
            builder = builder.use_preconfigured_tls((*tls.client_config()).clone());
        }
        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Endpoint this channel talks to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Absolute URL of an API path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.endpoint, API_PREFIX, path)
    }

    /// `GET` an API path
    pub async fn get(&self, path: &str, token: &str, params: &Params) -> Result<Value> {
        self.send(Method::GET, path, token, params, None).await
    }

    /// Perform an authenticated request and decode the extended JSON response
    ///
    /// An empty response body decodes to `Value::Null`.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        token: &str,
        params: &Params,
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = self.url(path);
        tracing::debug!(method = %method, url = %url, "request");

        let mut request = self
            .client
            .request(method, &url)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", token));
        if !params.is_empty() {
            request = request.query(params.pairs());
        }
        if let Some(body) = body {
            request = request.json(&ejson::inflate(body));
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.channel_error(e))?;
        let (status, bytes) = self.read_body(response).await?;

        if !status.is_success() {
            return Err(http_error(status, &bytes));
        }
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        ejson::parse(&bytes)
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<(StatusCode, bytes::Bytes)> {
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.channel_error(e))?;
        Ok((status, bytes))
    }

    /// Translate a reqwest failure, keeping the root cause for the hint
    fn channel_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            return Error::Timeout(format!("request to {}", self.endpoint));
        }
        let mut message = e.to_string();
        let mut source = e.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Error::from_channel(message, &self.endpoint)
    }
}

/// Normalize an error response into `Http{status, message}`
///
/// The message comes from a `{"message": ..}` body when there is one,
/// otherwise from the status reason.
fn http_error(status: StatusCode, body: &[u8]) -> Error {
    let message = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message")?.as_str().map(str::to_string))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
        });
    Error::Http {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl TokenService for HttpApi {
    async fn issue(&self, identity: &ConnectionIdentity) -> Result<TokenGrant> {
        let url = self.url(TOKEN_PATH);
        tracing::debug!(url = %url, instance = %identity.instance_id(), "requesting token");

        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "application/json")
            .json(&identity.token_request())
            .send()
            .await
            .map_err(|e| self.channel_error(e))?;
        let (status, bytes) = self.read_body(response).await?;

        if status.is_success() {
            return TokenGrant::from_body(&bytes);
        }
        match http_error(status, &bytes) {
            Error::Http { status, message }
                if status == 401 || status == 403 || (400..500).contains(&status) =>
            {
                Err(Error::Auth(message))
            }
            other => Err(other),
        }
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(TOKEN_PATH))
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| self.channel_error(e))?;
        let (status, bytes) = self.read_body(response).await?;
        if !status.is_success() {
            return Err(http_error(status, &bytes));
        }
        Ok(())
    }
}
