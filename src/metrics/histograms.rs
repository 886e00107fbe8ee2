//! Histogram metrics (durations in milliseconds)

use super::labels;

/// Time spent obtaining a token
pub fn token_acquire_duration(duration_ms: u64) {
    metrics::histogram!("scope_client_token_acquire_duration_ms").record(duration_ms as f64);
}

/// Time from connect (or reconnect) to readable
pub fn time_to_readable(duration_ms: u64) {
    metrics::histogram!("scope_client_time_to_readable_ms").record(duration_ms as f64);
}

/// HTTP request round trip
pub fn request_duration(outcome: &'static str, duration_ms: u64) {
    metrics::histogram!("scope_client_request_duration_ms", labels::OUTCOME => outcome)
        .record(duration_ms as f64);
}
