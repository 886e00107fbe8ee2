//! Metric label keys and common values

/// Outcome label key
pub const OUTCOME: &str = "outcome";

/// Reason label key
pub const REASON: &str = "reason";

/// Stream name label key
pub const STREAM: &str = "stream";

/// Successful outcome
pub const OUTCOME_OK: &str = "ok";

/// Failed outcome
pub const OUTCOME_ERROR: &str = "error";

/// Caller gave up (dropped stream, closed client)
pub const OUTCOME_CANCELLED: &str = "cancelled";
