//! Countdown auto-reveal and the one-second refresh tick.
//!
//! At most one countdown is honored at a time. Each countdown is a spawned
//! task holding its own cancellation token and the generation the registry
//! handed out for it. Starting a new countdown cancels the previous task,
//! and the registry refuses to fire any generation but the current one, so
//! a task that wakes after being superseded has no effect.
//!
//! Lock order: scheduler mutex, then registry lock. Expiry only takes the
//! registry lock.

use crate::observability::metrics;
use crate::registry::Registry;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Refresh interval for countdown displays.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Stateless signals fanned out to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Time passed; re-render anything showing a countdown.
    Tick,
    /// A countdown fired and revealed the round.
    TimerExpired,
}

/// Owns the single pending countdown.
#[derive(Debug)]
pub struct TimerScheduler {
    registry: Arc<Registry>,
    notices: broadcast::Sender<Notice>,
    shutdown: CancellationToken,
    pending: Mutex<Option<CancellationToken>>,
}

impl TimerScheduler {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        notices: broadcast::Sender<Notice>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            notices,
            shutdown,
            pending: Mutex::new(None),
        }
    }

    /// Clear the round and start a countdown of `duration`, replacing any
    /// pending one. Must be called from within a tokio runtime.
    pub fn start(&self, duration: Duration) -> u64 {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.cancel();
        }

        let generation = self.registry.begin_countdown(duration);
        let token = self.shutdown.child_token();
        *pending = Some(token.clone());
        drop(pending);

        info!(
            target: "showdown.timer",
            generation,
            duration_secs = duration.as_secs(),
            "Countdown started"
        );

        let registry = Arc::clone(&self.registry);
        let notices = self.notices.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(target: "showdown.timer", generation, "Countdown cancelled");
                }
                () = tokio::time::sleep(duration) => {
                    if registry.expire_countdown(generation) {
                        info!(target: "showdown.timer", generation, "Countdown expired, round revealed");
                        metrics::record_round_revealed("timer");
                        // No receivers just means nobody is connected.
                        let _ = notices.send(Notice::TimerExpired);
                    } else {
                        debug!(target: "showdown.timer", generation, "Stale countdown expiry ignored");
                    }
                }
            }
        });

        generation
    }

    /// Cancel any pending countdown. Votes and the reveal flag are untouched.
    pub fn stop(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.cancel();
        }
        if self.registry.cancel_countdown() {
            debug!(target: "showdown.timer", "Countdown stopped");
        }
    }
}

/// Spawn the refresh ticker. It stops when `shutdown` is cancelled.
pub fn spawn_ticker(
    notices: broadcast::Sender<Notice>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!(target: "showdown.timer", "Ticker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let _ = notices.send(Notice::Tick);
                }
            }
        }
    })
}
