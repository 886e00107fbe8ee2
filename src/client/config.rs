//! Client configuration

use crate::connection::{ReconnectPolicy, TlsConfig};
use crate::protocol::constants::{MIN_TOKEN_VALIDITY, REFRESH_REDLINE, STALL_TIMEOUT};
use std::time::Duration;

/// Client configuration
///
/// Timing knobs for the token lease, authentication and both channels.
/// Use `ClientConfig::builder()` to override the defaults.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Start connecting as soon as the client is created (default: true)
    pub autoconnect: bool,
    /// Minimum validity of a freshly issued token (default: 60 seconds)
    pub min_token_validity: Duration,
    /// How long before expiry the token is refreshed (default: 15 seconds)
    pub refresh_redline: Duration,
    /// Bound on the wait for the `authenticated` acknowledgement (default: 15 seconds)
    pub auth_timeout: Duration,
    /// HTTP request timeout
    pub request_timeout: Option<Duration>,
    /// HTTP connect and socket handshake timeout
    pub connect_timeout: Option<Duration>,
    /// Socket reconnect backoff
    pub reconnect: ReconnectPolicy,
    /// TLS for `https://` endpoints (None = system roots)
    pub tls: Option<TlsConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            autoconnect: true,
            min_token_validity: MIN_TOKEN_VALIDITY,
            refresh_redline: REFRESH_REDLINE,
            auth_timeout: STALL_TIMEOUT,
            request_timeout: None,
            connect_timeout: None,
            reconnect: ReconnectPolicy::default(),
            tls: None,
        }
    }
}

impl ClientConfig {
    /// Create a builder starting from the defaults
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = ClientConfig::builder()
    ///     .autoconnect(false)
    ///     .request_timeout(Duration::from_secs(30))
    ///     .build();
    /// ```
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: ClientConfig::default(),
        }
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Connect on creation
    ///
    /// Default: true
    pub fn autoconnect(mut self, autoconnect: bool) -> Self {
        self.config.autoconnect = autoconnect;
        self
    }

    /// Reject tokens valid for less than `duration`
    ///
    /// Default: 60 seconds
    pub fn min_token_validity(mut self, duration: Duration) -> Self {
        self.config.min_token_validity = duration;
        self
    }

    /// Refresh the token `duration` before it expires
    ///
    /// Default: 15 seconds
    pub fn refresh_redline(mut self, duration: Duration) -> Self {
        self.config.refresh_redline = duration;
        self
    }

    /// Give up on socket authentication after `duration`
    ///
    /// Default: 15 seconds
    pub fn auth_timeout(mut self, duration: Duration) -> Self {
        self.config.auth_timeout = duration;
        self
    }

    /// Set HTTP request timeout
    ///
    /// Default: None (no timeout)
    pub fn request_timeout(mut self, duration: Duration) -> Self {
        self.config.request_timeout = Some(duration);
        self
    }

    /// Set connect timeout for both channels
    ///
    /// Default: None (no timeout)
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = Some(duration);
        self
    }

    /// Set socket reconnect policy
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Set TLS configuration
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = Some(tls);
        self
    }

    /// Build the configuration
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
