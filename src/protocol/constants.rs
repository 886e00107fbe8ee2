//! Scope server protocol constants

use std::time::Duration;

/// Endpoint used when none is configured
pub const DEFAULT_ENDPOINT: &str = "http://localhost:29017";

/// Environment variable overriding [`DEFAULT_ENDPOINT`]
pub const ENDPOINT_ENV: &str = "SCOPE_ENDPOINT";

/// Prefix of every HTTP route
pub const API_PREFIX: &str = "/api/v1";

/// Token issue/revoke route, relative to [`API_PREFIX`]
pub const TOKEN_PATH: &str = "/token";

/// Path of the persistent channel
pub const SOCKET_PATH: &str = "/socket";

/// Minimum validity a freshly issued token must have
pub const MIN_TOKEN_VALIDITY: Duration = Duration::from_secs(60);

/// How long before expiry a refresh is scheduled
pub const REFRESH_REDLINE: Duration = Duration::from_secs(15);

/// How long a connecting client may sit without becoming readable
pub const STALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Stream frame delimiters
pub mod frames {
    /// First document follows
    pub const OPEN: &[u8] = b"[\n";

    /// Next document follows
    pub const NEXT: &[u8] = b"\n,\n";

    /// End of stream
    pub const END: &[u8] = b"\n]\n";
}
