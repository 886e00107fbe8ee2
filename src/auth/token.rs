//! Token lease
//!
//! A token is a time-limited credential issued by the scope server in exchange
//! for the database credentials of a [`ConnectionIdentity`]. The lease holds the
//! current token, refreshes it ahead of expiry and revokes it on close.

use crate::client::ConnectionIdentity;
use crate::ejson::{self, Value};
use crate::protocol::constants::{MIN_TOKEN_VALIDITY, REFRESH_REDLINE};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Issues and revokes tokens
///
/// Implemented by [`HttpApi`](crate::http::HttpApi) against a real server.
#[async_trait]
pub trait TokenService: Send + Sync + 'static {
    /// Exchange credentials for a token
    async fn issue(&self, identity: &ConnectionIdentity) -> Result<TokenGrant>;

    /// Revoke a token
    async fn revoke(&self, token: &str) -> Result<()>;
}

/// Token as returned by the server, before validation
#[derive(Clone, PartialEq)]
pub struct TokenGrant {
    /// Raw token
    pub token: String,
    /// Issue time reported by the server
    pub created_at: DateTime<Utc>,
    /// Expiry
    pub expires_at: DateTime<Utc>,
}

impl TokenGrant {
    /// Parse a `{token, expires_at, created_at}` response body
    ///
    /// Dates may be ISO-8601 strings, epoch milliseconds or `{"$date": ..}`.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let value = ejson::parse(body)
            .map_err(|e| Error::Protocol(format!("malformed token response: {}", e)))?;

        let token = value
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Protocol("token response missing `token`".into()))?
            .to_string();

        Ok(Self {
            token,
            created_at: date_field(&value, "created_at")?,
            expires_at: date_field(&value, "expires_at")?,
        })
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("token", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn date_field(value: &Value, key: &str) -> Result<DateTime<Utc>> {
    let missing = || Error::Protocol(format!("token response missing or invalid `{}`", key));
    match value.get(key).ok_or_else(missing)? {
        Value::DateTime(dt) => Ok(*dt),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| missing()),
        other => other
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(missing),
    }
}

/// A validated token
///
/// Tokens are replaced, never mutated. `generation` increases by one with every
/// token a lease obtains.
#[derive(Clone, PartialEq)]
pub struct Token {
    value: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    generation: u64,
}

impl Token {
    /// Raw token string
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }

    /// When the token was issued
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// When the token expires
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Position of this token in its lease's sequence
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Time left until expiry at `now` (zero once expired)
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Check that a grant is valid for at least `minimum` from `now`
pub fn check_validity(grant: &TokenGrant, now: DateTime<Utc>, minimum: Duration) -> Result<()> {
    let remaining = grant.expires_at - now;
    let minimum_ms = i64::try_from(minimum.as_millis()).unwrap_or(i64::MAX);
    if remaining.num_milliseconds() < minimum_ms {
        return Err(Error::ExpiryTooSoon {
            remaining_secs: remaining.num_seconds(),
            minimum_secs: minimum.as_secs(),
        });
    }
    Ok(())
}

/// Refresh timer firing for one token generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshDue {
    /// Generation the timer was armed for
    pub generation: u64,
}

/// Token lease of one client
///
/// Owned by a single task; at most one refresh timer is outstanding.
pub struct TokenLease {
    service: Arc<dyn TokenService>,
    identity: ConnectionIdentity,
    min_validity: Duration,
    redline: Duration,
    current: Option<Arc<Token>>,
    generation: u64,
    refresh_timer: Option<JoinHandle<()>>,
}

impl TokenLease {
    /// Create an empty lease with the default validity window and redline
    pub fn new(service: Arc<dyn TokenService>, identity: ConnectionIdentity) -> Self {
        Self {
            service,
            identity,
            min_validity: MIN_TOKEN_VALIDITY,
            redline: REFRESH_REDLINE,
            current: None,
            generation: 0,
            refresh_timer: None,
        }
    }

    /// Minimum validity required of a freshly issued token
    pub fn min_validity(mut self, min_validity: Duration) -> Self {
        self.min_validity = min_validity;
        self
    }

    /// How long before expiry the refresh fires
    pub fn redline(mut self, redline: Duration) -> Self {
        self.redline = redline;
        self
    }

    /// Current token, if one has been acquired
    pub fn current(&self) -> Option<Arc<Token>> {
        self.current.clone()
    }

    /// Whether a refresh timer is armed
    pub fn has_refresh_timer(&self) -> bool {
        self.refresh_timer
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Obtain a token from the server and make it current
    ///
    /// Fails with `ExpiryTooSoon` when the server hands out a token that
    /// expires inside the minimum validity window. Never retried.
    pub async fn acquire(&mut self) -> Result<Arc<Token>> {
        let start = std::time::Instant::now();
        let grant = match self.service.issue(&self.identity).await {
            Ok(grant) => grant,
            Err(e) => {
                crate::metrics::counters::token_failed(e.category());
                return Err(e);
            }
        };
        if let Err(e) = check_validity(&grant, Utc::now(), self.min_validity) {
            crate::metrics::counters::token_failed(e.category());
            return Err(e);
        }
        crate::metrics::counters::token_issued();
        crate::metrics::histograms::token_acquire_duration(start.elapsed().as_millis() as u64);

        self.generation += 1;
        let token = Arc::new(Token {
            value: grant.token,
            issued_at: grant.created_at,
            expires_at: grant.expires_at,
            generation: self.generation,
        });
        tracing::debug!(
            generation = token.generation,
            expires_at = %token.expires_at,
            "token acquired"
        );
        self.current = Some(token.clone());
        Ok(token)
    }

    /// Replace the current token with a fresh one
    ///
    /// The superseded token is revoked in the background, best-effort.
    pub async fn refresh(&mut self) -> Result<Arc<Token>> {
        let previous = self.current.clone();
        let token = self.acquire().await?;
        crate::metrics::counters::token_refreshed();
        if let Some(previous) = previous {
            let service = self.service.clone();
            tokio::spawn(async move {
                revoke_best_effort(service.as_ref(), &previous).await;
            });
        }
        Ok(token)
    }

    /// Arm the refresh timer for the current token
    ///
    /// Fires `redline` before expiry (immediately if that is already past),
    /// sending the generation it was armed for. Re-arming aborts the previous
    /// timer.
    pub fn schedule_refresh(&mut self, tx: mpsc::UnboundedSender<RefreshDue>) {
        self.cancel_refresh();
        let token = match &self.current {
            Some(token) => token.clone(),
            None => return,
        };

        let delay = token
            .remaining(Utc::now())
            .saturating_sub(self.redline);
        let generation = token.generation;
        tracing::debug!(generation, delay_ms = delay.as_millis() as u64, "refresh scheduled");

        self.refresh_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(RefreshDue { generation });
        }));
    }

    /// Disarm the refresh timer
    pub fn cancel_refresh(&mut self) {
        if let Some(timer) = self.refresh_timer.take() {
            timer.abort();
        }
    }

    /// Cancel the timer and revoke the current token
    ///
    /// Revocation failures are logged, never returned.
    pub async fn close(&mut self) {
        self.cancel_refresh();
        match self.current.take() {
            Some(token) => revoke_best_effort(self.service.as_ref(), &token).await,
            None => tracing::debug!("no token to revoke"),
        }
    }
}

impl Drop for TokenLease {
    fn drop(&mut self) {
        self.cancel_refresh();
    }
}

impl std::fmt::Debug for TokenLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLease")
            .field("identity", &self.identity)
            .field("current", &self.current)
            .field("min_validity", &self.min_validity)
            .field("redline", &self.redline)
            .finish()
    }
}

async fn revoke_best_effort(service: &dyn TokenService, token: &Token) {
    match service.revoke(token.as_str()).await {
        Ok(()) => {
            tracing::debug!(generation = token.generation, "token revoked");
            crate::metrics::counters::token_revoked(crate::metrics::labels::OUTCOME_OK);
        }
        Err(e) => {
            tracing::warn!(generation = token.generation, error = %e, "failed to revoke token");
            crate::metrics::counters::token_revoked(crate::metrics::labels::OUTCOME_ERROR);
        }
    }
}
