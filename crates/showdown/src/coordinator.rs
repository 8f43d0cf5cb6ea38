//! Session coordinator.
//!
//! The explicitly constructed service every connection task receives. It
//! owns the registry, the countdown scheduler, admission control and the
//! facilitator key check, and hands out leases that tie a connection's role
//! to its lifetime:
//!
//! - [`ParticipantLease`] removes its registry entry on drop, but only while
//!   the entry still belongs to the same connection.
//! - [`FacilitatorLease`] releases the facilitator slot on drop and, if it
//!   still held the slot, stops the countdown and disconnects every
//!   participant.
//!
//! Both cleanups are idempotent with respect to disconnect-all, timeouts and
//! shutdown, which may already have removed the entries.

use crate::admission::{AdmissionController, AdmissionLimits};
use crate::auth::{FacilitatorKeys, PublicKey};
use crate::errors::ShowdownError;
use crate::identity;
use crate::observability::metrics;
use crate::registry::{FacilitatorClaim, Registry, SessionSnapshot};
use crate::timer::{self, Notice, TimerScheduler};
use crate::transport::{ConnectionId, SharedHandle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Capacity of the notice channel. Slow receivers skip ahead.
const NOTICE_CAPACITY: usize = 64;

/// Settings the coordinator is built from.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub admission: AdmissionLimits,
    pub max_participants: usize,
    pub authorized_keys_path: PathBuf,
}

impl From<&crate::config::Config> for CoordinatorSettings {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            admission: config.admission_limits(),
            max_participants: config.max_participants,
            authorized_keys_path: config.authorized_keys_path.clone(),
        }
    }
}

/// Role a connection ends up with after credential resolution.
#[derive(Debug)]
pub enum Role {
    Facilitator(FacilitatorLease),
    /// Proceeds to name entry.
    Participant,
}

#[derive(Debug)]
pub struct SessionCoordinator {
    registry: Arc<Registry>,
    timer: TimerScheduler,
    admission: AdmissionController,
    facilitator_keys: FacilitatorKeys,
    notices: broadcast::Sender<Notice>,
    shutdown: CancellationToken,
}

impl SessionCoordinator {
    /// Build the coordinator. `shutdown` is the root token: cancelling it
    /// stops the ticker, pending countdowns and every connection.
    #[must_use]
    pub fn new(settings: CoordinatorSettings, shutdown: CancellationToken) -> Arc<Self> {
        let registry = Arc::new(Registry::new(settings.max_participants));
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let timer = TimerScheduler::new(Arc::clone(&registry), notices.clone(), shutdown.clone());

        Arc::new(Self {
            registry,
            timer,
            admission: AdmissionController::new(settings.admission),
            facilitator_keys: FacilitatorKeys::new(settings.authorized_keys_path),
            notices,
            shutdown,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.registry.snapshot()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Start the one-second refresh ticker.
    pub fn spawn_ticker(&self) -> JoinHandle<()> {
        timer::spawn_ticker(self.notices.clone(), self.shutdown.clone())
    }

    /// Decide a connection's role from its (already verified) credential.
    ///
    /// An authorized key claims the facilitator slot; if the slot is taken
    /// the connection is refused. No key, or a key not on the list, goes to
    /// name entry.
    pub async fn resolve_role(
        self: &Arc<Self>,
        credential: Option<&PublicKey>,
        handle: SharedHandle,
    ) -> Result<Role, ShowdownError> {
        let Some(key) = credential else {
            return Ok(Role::Participant);
        };
        if !self.facilitator_keys.is_authorized(key).await {
            info!(
                target: "showdown.session",
                connection = %handle.id(),
                "Presented key is not authorized, continuing as participant"
            );
            return Ok(Role::Participant);
        }

        let owner = handle.id();
        match self.registry.claim_facilitator(handle) {
            FacilitatorClaim::Granted => {
                metrics::record_facilitator_claim("granted");
                info!(target: "showdown.session", connection = %owner, "Facilitator connected");
                Ok(Role::Facilitator(FacilitatorLease {
                    coordinator: Arc::clone(self),
                    owner,
                }))
            }
            FacilitatorClaim::Denied => {
                metrics::record_facilitator_claim("denied");
                warn!(
                    target: "showdown.session",
                    connection = %owner,
                    "Facilitator already connected, refusing second facilitator"
                );
                Err(ShowdownError::FacilitatorActive)
            }
        }
    }

    /// Validate `candidate` and register it as a participant.
    pub fn join(
        self: &Arc<Self>,
        candidate: &str,
        handle: SharedHandle,
    ) -> Result<ParticipantLease, ShowdownError> {
        let name = identity::validate_name(candidate, &self.registry)?.to_string();
        let owner = handle.id();
        self.registry.register_participant(&name, handle)?;

        let count = self.registry.participant_count();
        metrics::set_participants_active(count);
        info!(
            target: "showdown.session",
            participant = %name,
            connection = %owner,
            participants = count,
            "Participant joined"
        );

        Ok(ParticipantLease {
            coordinator: Arc::clone(self),
            name,
            owner,
        })
    }

    /// Stop accepting work: terminate every registered connection and
    /// cancel the root token. Returns how many handles were terminated.
    pub fn begin_shutdown(&self) -> usize {
        let terminated = self.registry.terminate_all();
        self.shutdown.cancel();
        info!(
            target: "showdown.session",
            terminated,
            "Shutdown started, sessions terminated"
        );
        terminated
    }
}

/// A registered participant, removed from the registry on drop.
#[derive(Debug)]
#[must_use = "dropping the lease removes the participant"]
pub struct ParticipantLease {
    coordinator: Arc<SessionCoordinator>,
    name: String,
    owner: ConnectionId,
}

impl ParticipantLease {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cast or change this participant's vote. Ignored after reveal.
    pub fn vote(&self, token: &str) -> bool {
        let recorded = self.coordinator.registry.cast_vote(&self.name, token);
        if recorded {
            metrics::record_vote_cast();
        }
        recorded
    }

    /// Whether this participant is still registered (disconnect-all removes
    /// entries without going through the lease).
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.coordinator.registry.contains(&self.name)
    }
}

impl Drop for ParticipantLease {
    fn drop(&mut self) {
        let registry = &self.coordinator.registry;
        if registry.remove_participant_owned(&self.name, self.owner) {
            info!(target: "showdown.session", participant = %self.name, "Participant left");
        }
        metrics::set_participants_active(registry.participant_count());
    }
}

/// The facilitator slot, released on drop.
#[derive(Debug)]
#[must_use = "dropping the lease releases the facilitator slot"]
pub struct FacilitatorLease {
    coordinator: Arc<SessionCoordinator>,
    owner: ConnectionId,
}

impl FacilitatorLease {
    /// Reveal the current round.
    pub fn reveal(&self) {
        if self.coordinator.registry.reveal() {
            metrics::record_round_revealed("manual");
            info!(target: "showdown.session", "Round revealed");
        }
    }

    /// Start a new round: cancel the countdown and reset every vote.
    pub fn clear(&self) {
        self.coordinator.timer.stop();
        self.coordinator.registry.clear();
        info!(target: "showdown.session", "Round cleared");
    }

    /// Disconnect every participant. Returns how many were disconnected.
    pub fn disconnect_all(&self) -> usize {
        self.coordinator.timer.stop();
        let disconnected = self.coordinator.registry.disconnect_all();
        metrics::set_participants_active(0);
        info!(target: "showdown.session", disconnected, "All participants disconnected");
        disconnected
    }

    /// Clear the round and start a countdown that reveals on expiry.
    pub fn start_countdown(&self, duration: Duration) -> u64 {
        self.coordinator.timer.start(duration)
    }
}

impl Drop for FacilitatorLease {
    fn drop(&mut self) {
        let coordinator = &self.coordinator;
        if !coordinator.registry.release_facilitator(self.owner) {
            return;
        }
        coordinator.timer.stop();
        let disconnected = coordinator.registry.disconnect_all();
        metrics::set_participants_active(0);
        info!(
            target: "showdown.session",
            connection = %self.owner,
            disconnected,
            "Facilitator left, session reset"
        );
    }
}
