//! Metrics definitions for the Showdown server.
//!
//! All metrics follow Prometheus naming conventions:
//! - `showdown_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `reason`: admission rejection reasons (capacity, per_origin)
//! - `trigger`: reveal triggers (manual, timer)
//! - `outcome`: facilitator claim outcomes (granted, denied)
//! - `role`: connection roles (participant, facilitator, none)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Sessions range from seconds (rejected name entry) to the 30 minute cap.
        .set_buckets_for_metric(
            Matcher::Prefix("showdown_session_duration".to_string()),
            &[
                1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0, 1200.0, 1800.0,
            ],
        )
        .map_err(|e| format!("Failed to set session duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Connection Metrics
// ============================================================================

/// Set the number of connections holding an admission slot.
///
/// Metric: `showdown_connections_active`
pub fn set_connections_active(count: usize) {
    // Bounded by the admission ceiling.
    #[allow(clippy::cast_precision_loss)]
    gauge!("showdown_connections_active").set(count as f64);
}

/// Metric: `showdown_connections_admitted_total`
pub fn record_connection_admitted() {
    counter!("showdown_connections_admitted_total").increment(1);
}

/// Record a rejected connection.
///
/// Metric: `showdown_connections_rejected_total`
/// Labels: `reason` (capacity, per_origin)
pub fn record_connection_rejected(reason: &'static str) {
    counter!("showdown_connections_rejected_total", "reason" => reason).increment(1);
}

/// Record a connection cut off by the session lifetime.
///
/// Metric: `showdown_session_timeouts_total`
pub fn record_session_timeout() {
    counter!("showdown_session_timeouts_total").increment(1);
}

/// Record how long a connection lasted.
///
/// Metric: `showdown_session_duration_seconds`
/// Labels: `role` (participant, facilitator, none)
pub fn record_session_duration(role: &'static str, duration: Duration) {
    histogram!("showdown_session_duration_seconds", "role" => role)
        .record(duration.as_secs_f64());
}

// ============================================================================
// Round Metrics
// ============================================================================

/// Metric: `showdown_participants_active`
pub fn set_participants_active(count: usize) {
    // Bounded by the participant cap.
    #[allow(clippy::cast_precision_loss)]
    gauge!("showdown_participants_active").set(count as f64);
}

/// Metric: `showdown_votes_cast_total`
pub fn record_vote_cast() {
    counter!("showdown_votes_cast_total").increment(1);
}

/// Record a round reveal.
///
/// Metric: `showdown_rounds_revealed_total`
/// Labels: `trigger` (manual, timer)
pub fn record_round_revealed(trigger: &'static str) {
    counter!("showdown_rounds_revealed_total", "trigger" => trigger).increment(1);
}

/// Record a facilitator claim attempt.
///
/// Metric: `showdown_facilitator_claims_total`
/// Labels: `outcome` (granted, denied)
pub fn record_facilitator_claim(outcome: &'static str) {
    counter!("showdown_facilitator_claims_total", "outcome" => outcome).increment(1);
}
