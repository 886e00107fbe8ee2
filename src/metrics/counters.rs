//! Counter metrics

use super::labels;

/// Token issued by the server
pub fn token_issued() {
    metrics::counter!("scope_client_tokens_issued_total").increment(1);
}

/// Token acquisition failed, by error category
pub fn token_failed(reason: &'static str) {
    metrics::counter!("scope_client_tokens_failed_total", labels::REASON => reason).increment(1);
}

/// Token revocation attempted
pub fn token_revoked(outcome: &'static str) {
    metrics::counter!("scope_client_tokens_revoked_total", labels::OUTCOME => outcome)
        .increment(1);
}

/// Lease replaced by a scheduled refresh or a reconnect
pub fn token_refreshed() {
    metrics::counter!("scope_client_token_refreshes_total").increment(1);
}

/// `authenticated` acknowledgement honoured
pub fn auth_accepted() {
    metrics::counter!("scope_client_authentications_total", labels::OUTCOME => labels::OUTCOME_OK)
        .increment(1);
}

/// `unauthorized` received
pub fn auth_rejected() {
    metrics::counter!(
        "scope_client_authentications_total",
        labels::OUTCOME => labels::OUTCOME_ERROR
    )
    .increment(1);
}

/// Acknowledgement for a superseded token discarded
pub fn auth_stale_ack() {
    metrics::counter!("scope_client_stale_acks_total").increment(1);
}

/// Reconnect attempt started
pub fn reconnect_attempted() {
    metrics::counter!("scope_client_reconnect_attempts_total").increment(1);
}

/// Reconnect cycle finished
pub fn reconnect_finished(outcome: &'static str) {
    metrics::counter!("scope_client_reconnects_total", labels::OUTCOME => outcome).increment(1);
}

/// HTTP request finished
pub fn request_completed(outcome: &'static str) {
    metrics::counter!("scope_client_requests_total", labels::OUTCOME => outcome).increment(1);
}

/// Read queued until the client becomes readable
pub fn pending_read_queued() {
    metrics::counter!("scope_client_pending_reads_total").increment(1);
}

/// Stream opened on the socket
pub fn stream_opened(name: &str) {
    metrics::counter!("scope_client_streams_opened_total", labels::STREAM => name.to_string())
        .increment(1);
}

/// Stream finished
pub fn stream_completed(name: &str, outcome: &'static str) {
    metrics::counter!(
        "scope_client_streams_completed_total",
        labels::STREAM => name.to_string(),
        labels::OUTCOME => outcome
    )
    .increment(1);
}

/// Unrecognized frame delimiter
pub fn framing_error(name: &str) {
    metrics::counter!("scope_client_framing_errors_total", labels::STREAM => name.to_string())
        .increment(1);
}

/// Document yielded to a stream consumer
pub fn document_decoded(name: &str) {
    metrics::counter!("scope_client_documents_total", labels::STREAM => name.to_string())
        .increment(1);
}

/// Client went dead
pub fn client_dead(reason: &'static str) {
    metrics::counter!("scope_client_dead_total", labels::REASON => reason).increment(1);
}
