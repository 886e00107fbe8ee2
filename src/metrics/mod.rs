//! Metrics for observability
//!
//! Thin wrappers around the `metrics` facade. Nothing is recorded unless the
//! application installs a recorder.

pub mod counters;
pub mod histograms;
pub mod labels;
