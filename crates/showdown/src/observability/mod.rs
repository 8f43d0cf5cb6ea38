//! Observability for the Showdown server.
//!
//! Metric labels are bounded; participant names never appear in labels.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `showdown_connections_active` | Gauge | none |
//! | `showdown_connections_admitted_total` | Counter | none |
//! | `showdown_connections_rejected_total` | Counter | `reason` |
//! | `showdown_session_timeouts_total` | Counter | none |
//! | `showdown_session_duration_seconds` | Histogram | `role` |
//! | `showdown_participants_active` | Gauge | none |
//! | `showdown_votes_cast_total` | Counter | none |
//! | `showdown_rounds_revealed_total` | Counter | `trigger` |
//! | `showdown_facilitator_claims_total` | Counter | `outcome` |

pub mod health;
pub mod metrics;

pub use health::{health_router, metrics_router, HealthState};
pub use metrics::init_metrics_recorder;
