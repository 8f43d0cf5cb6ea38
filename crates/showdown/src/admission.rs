//! Connection admission control.
//!
//! Every accepted connection must obtain an [`AdmissionSlot`] before any
//! session logic runs. The slot holds one unit of the global budget and one
//! unit of its origin's budget and gives both back when dropped, so every
//! exit path of a connection task (normal close, error, forced timeout,
//! panic unwinding) releases exactly once.
//!
//! Admission also owns the hard session lifetime: [`AdmissionController::within_session_limit`]
//! races a connection's handler against the configured maximum duration.

use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default ceiling on concurrently open connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Default ceiling on concurrently open connections from one origin.
pub const DEFAULT_MAX_CONNECTIONS_PER_ORIGIN: usize = 10;

/// Default hard lifetime of one connection (30 minutes).
pub const DEFAULT_MAX_SESSION_DURATION: Duration = Duration::from_secs(30 * 60);

/// Limits enforced by the [`AdmissionController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionLimits {
    pub max_connections: usize,
    pub max_connections_per_origin: usize,
    pub max_session_duration: Duration,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_connections_per_origin: DEFAULT_MAX_CONNECTIONS_PER_ORIGIN,
            max_session_duration: DEFAULT_MAX_SESSION_DURATION,
        }
    }
}

/// Why a connection was turned away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The global connection ceiling is reached.
    #[error("Server at capacity ({limit} connections), please try again later")]
    AtCapacity { limit: usize },

    /// The origin already holds its share of connections.
    #[error("Too many connections from your IP address")]
    OriginLimit { origin: IpAddr, limit: usize },
}

impl AdmissionError {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            AdmissionError::AtCapacity { .. } => "capacity",
            AdmissionError::OriginLimit { .. } => "per_origin",
        }
    }
}

/// The session lifetime elapsed before the handler finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Session exceeded the maximum duration of {}s", .limit.as_secs())]
pub struct SessionExpired {
    pub limit: Duration,
}

#[derive(Debug, Default)]
struct AdmissionState {
    active: usize,
    by_origin: HashMap<IpAddr, usize>,
}

/// Gatekeeper for new connections. Cheap to clone; clones share counters.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    limits: AdmissionLimits,
    state: Arc<RwLock<AdmissionState>>,
}

impl AdmissionController {
    #[must_use]
    pub fn new(limits: AdmissionLimits) -> Self {
        Self {
            limits,
            state: Arc::new(RwLock::new(AdmissionState::default())),
        }
    }

    /// Admit a connection from `origin` or explain why not.
    ///
    /// Both limits are checked and both counters incremented under one write
    /// lock, so a rejected attempt never changes either counter.
    pub fn try_admit(&self, origin: IpAddr) -> Result<AdmissionSlot, AdmissionError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.active >= self.limits.max_connections {
            return Err(AdmissionError::AtCapacity {
                limit: self.limits.max_connections,
            });
        }

        let from_origin = state.by_origin.get(&origin).copied().unwrap_or(0);
        if from_origin >= self.limits.max_connections_per_origin {
            return Err(AdmissionError::OriginLimit {
                origin,
                limit: self.limits.max_connections_per_origin,
            });
        }

        state.active += 1;
        state.by_origin.insert(origin, from_origin + 1);

        debug!(
            target: "showdown.admission",
            origin = %origin,
            active = state.active,
            from_origin = from_origin + 1,
            "Connection admitted"
        );

        Ok(AdmissionSlot {
            origin,
            state: Arc::clone(&self.state),
        })
    }

    /// Number of connections currently holding a slot.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .active
    }

    /// Number of connections currently holding a slot for `origin`.
    #[must_use]
    pub fn connections_from(&self, origin: IpAddr) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_origin
            .get(&origin)
            .copied()
            .unwrap_or(0)
    }

    /// Run `handler` until it completes or the session lifetime elapses,
    /// whichever comes first. On expiry the handler future is dropped, which
    /// runs the drop glue of everything it owns.
    pub async fn within_session_limit<F>(&self, handler: F) -> Result<F::Output, SessionExpired>
    where
        F: Future,
    {
        let limit = self.limits.max_session_duration;
        tokio::time::timeout(limit, handler)
            .await
            .map_err(|_| SessionExpired { limit })
    }
}

/// One admitted connection's share of the budget.
#[derive(Debug)]
#[must_use = "dropping the slot immediately releases the admission"]
pub struct AdmissionSlot {
    origin: IpAddr,
    state: Arc<RwLock<AdmissionState>>,
}

impl AdmissionSlot {
    #[must_use]
    pub fn origin(&self) -> IpAddr {
        self.origin
    }
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.active = state.active.saturating_sub(1);

        let emptied = match state.by_origin.get_mut(&self.origin) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if emptied {
            state.by_origin.remove(&self.origin);
        }

        debug!(
            target: "showdown.admission",
            origin = %self.origin,
            active = state.active,
            "Connection released"
        );
    }
}
