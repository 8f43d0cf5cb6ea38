//! Session registry.
//!
//! The one piece of shared mutable state: registered participants, the
//! facilitator slot, the reveal flag and the active countdown. Every method
//! takes the lock for a single logical operation and releases it before
//! returning; nothing here awaits or writes to a connection while holding it.
//! Connection handles collected under the lock are terminated after it is
//! released.

use crate::stats::{self, VoteSummary};
use crate::transport::{ConnectionId, SharedHandle};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Default cap on registered participants.
pub const DEFAULT_MAX_PARTICIPANTS: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("name already taken")]
    NameTaken { name: String },

    #[error("session is full ({limit} participants), please try again later")]
    SessionFull { limit: usize },
}

/// Outcome of a facilitator claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacilitatorClaim {
    Granted,
    Denied,
}

#[derive(Debug)]
struct Participant {
    vote: String,
    has_voted: bool,
    handle: SharedHandle,
}

impl Participant {
    fn reset_vote(&mut self) {
        self.vote.clear();
        self.has_voted = false;
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveTimer {
    generation: u64,
    duration: Duration,
    deadline: Instant,
}

#[derive(Debug)]
struct SessionState {
    participants: HashMap<String, Participant>,
    revealed: bool,
    facilitator: Option<SharedHandle>,
    timer: Option<ActiveTimer>,
    timer_generation: u64,
}

impl SessionState {
    fn reset_round(&mut self) {
        self.revealed = false;
        for participant in self.participants.values_mut() {
            participant.reset_vote();
        }
    }
}

/// One participant row in a [`SessionSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantEntry {
    pub name: String,
    /// Selected token, `None` until the participant votes.
    pub vote: Option<String>,
    pub has_voted: bool,
}

/// The countdown as seen in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownView {
    pub duration: Duration,
    pub deadline: Instant,
}

impl CountdownView {
    /// Time left at `now`, zero once the deadline has passed.
    #[must_use]
    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }
}

/// Phase of the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Voting,
    Revealed,
}

/// Owned copy of the registry, taken under the read lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Sorted by name.
    pub participants: Vec<ParticipantEntry>,
    pub revealed: bool,
    pub facilitator_present: bool,
    pub countdown: Option<CountdownView>,
}

impl SessionSnapshot {
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn voted_count(&self) -> usize {
        self.participants.iter().filter(|p| p.has_voted).count()
    }

    #[must_use]
    pub fn phase(&self) -> RoundPhase {
        if self.revealed {
            RoundPhase::Revealed
        } else {
            RoundPhase::Voting
        }
    }

    #[must_use]
    pub fn participant(&self, name: &str) -> Option<&ParticipantEntry> {
        self.participants.iter().find(|p| p.name == name)
    }

    /// Tokens of everyone who voted, in name order.
    #[must_use]
    pub fn votes(&self) -> Vec<&str> {
        self.participants
            .iter()
            .filter(|p| p.has_voted)
            .filter_map(|p| p.vote.as_deref())
            .collect()
    }

    #[must_use]
    pub fn summary(&self) -> VoteSummary {
        stats::summarize(&self.votes())
    }
}

/// The shared session state. Constructed once and passed by reference.
#[derive(Debug)]
pub struct Registry {
    state: RwLock<SessionState>,
    max_participants: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PARTICIPANTS)
    }
}

impl Registry {
    #[must_use]
    pub fn new(max_participants: usize) -> Self {
        Self {
            state: RwLock::new(SessionState {
                participants: HashMap::new(),
                revealed: false,
                facilitator: None,
                timer: None,
                timer_generation: 0,
            }),
            max_participants,
        }
    }

    #[must_use]
    pub fn max_participants(&self) -> usize {
        self.max_participants
    }

    // Every critical section leaves the state consistent, so a poisoned lock
    // is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `name` with an empty vote. The name must already be validated;
    /// this re-checks uniqueness under the write lock.
    pub fn register_participant(
        &self,
        name: &str,
        handle: SharedHandle,
    ) -> Result<(), RegistryError> {
        let mut state = self.write();
        if state.participants.contains_key(name) {
            return Err(RegistryError::NameTaken {
                name: name.to_string(),
            });
        }
        if state.participants.len() >= self.max_participants {
            return Err(RegistryError::SessionFull {
                limit: self.max_participants,
            });
        }
        state.participants.insert(
            name.to_string(),
            Participant {
                vote: String::new(),
                has_voted: false,
                handle,
            },
        );
        debug!(
            target: "showdown.registry",
            participant = %name,
            participants = state.participants.len(),
            "Participant registered"
        );
        Ok(())
    }

    /// Remove `name` if present. Returns whether an entry was removed.
    pub fn remove_participant(&self, name: &str) -> bool {
        self.write().participants.remove(name).is_some()
    }

    /// Remove `name` only if it is still held by connection `owner`.
    pub fn remove_participant_owned(&self, name: &str, owner: ConnectionId) -> bool {
        let mut state = self.write();
        let owned = state
            .participants
            .get(name)
            .is_some_and(|p| p.handle.id() == owner);
        if owned {
            state.participants.remove(name);
        }
        owned
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().participants.contains_key(name)
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.read().participants.len()
    }

    /// Record `token` as `name`'s vote. Ignored once the round is revealed
    /// or when `name` is not registered. Returns whether the vote was stored.
    pub fn cast_vote(&self, name: &str, token: &str) -> bool {
        let mut state = self.write();
        if state.revealed {
            return false;
        }
        match state.participants.get_mut(name) {
            Some(participant) => {
                participant.vote = token.to_string();
                participant.has_voted = true;
                true
            }
            None => false,
        }
    }

    /// Expose votes. Returns `false` if the round was already revealed.
    pub fn reveal(&self) -> bool {
        let mut state = self.write();
        let changed = !state.revealed;
        state.revealed = true;
        changed
    }

    /// Start a fresh round: hide votes, reset every vote, drop the countdown.
    pub fn clear(&self) {
        let mut state = self.write();
        state.reset_round();
        state.timer = None;
    }

    /// Remove every participant and terminate their connections. The
    /// facilitator slot is left alone. Returns how many were disconnected.
    pub fn disconnect_all(&self) -> usize {
        let drained: Vec<(String, Participant)> = {
            let mut state = self.write();
            state.revealed = false;
            state.timer = None;
            state.participants.drain().collect()
        };

        for (name, participant) in &drained {
            debug!(target: "showdown.registry", participant = %name, "Terminating participant");
            participant.handle.terminate();
        }
        drained.len()
    }

    /// Terminate every connection known to the registry, facilitator
    /// included, without removing anything. Each connection's own cleanup
    /// removes its entry.
    pub fn terminate_all(&self) -> usize {
        let handles: Vec<SharedHandle> = {
            let state = self.read();
            state
                .participants
                .values()
                .map(|p| SharedHandle::clone(&p.handle))
                .chain(state.facilitator.iter().cloned())
                .collect()
        };
        for handle in &handles {
            handle.terminate();
        }
        handles.len()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.read();
        let mut participants: Vec<ParticipantEntry> = state
            .participants
            .iter()
            .map(|(name, p)| ParticipantEntry {
                name: name.clone(),
                vote: p.has_voted.then(|| p.vote.clone()),
                has_voted: p.has_voted,
            })
            .collect();
        participants.sort_by(|a, b| a.name.cmp(&b.name));

        SessionSnapshot {
            participants,
            revealed: state.revealed,
            facilitator_present: state.facilitator.is_some(),
            countdown: state.timer.map(|t| CountdownView {
                duration: t.duration,
                deadline: t.deadline,
            }),
        }
    }

    /// Take the facilitator slot if it is free.
    pub fn claim_facilitator(&self, handle: SharedHandle) -> FacilitatorClaim {
        let mut state = self.write();
        if state.facilitator.is_some() {
            return FacilitatorClaim::Denied;
        }
        state.facilitator = Some(handle);
        FacilitatorClaim::Granted
    }

    /// Release the facilitator slot if `holder` is the current facilitator.
    pub fn release_facilitator(&self, holder: ConnectionId) -> bool {
        let mut state = self.write();
        let held = state
            .facilitator
            .as_ref()
            .is_some_and(|f| f.id() == holder);
        if held {
            state.facilitator = None;
        }
        held
    }

    #[must_use]
    pub fn facilitator_present(&self) -> bool {
        self.read().facilitator.is_some()
    }

    /// Reset the round and arm a countdown of `duration`. Returns the new
    /// countdown's generation; any earlier generation is now stale.
    pub fn begin_countdown(&self, duration: Duration) -> u64 {
        let mut state = self.write();
        state.reset_round();
        state.timer_generation = state.timer_generation.wrapping_add(1);
        let generation = state.timer_generation;
        state.timer = Some(ActiveTimer {
            generation,
            duration,
            deadline: Instant::now() + duration,
        });
        generation
    }

    /// Drop the countdown without touching votes or the reveal flag.
    pub fn cancel_countdown(&self) -> bool {
        self.write().timer.take().is_some()
    }

    /// Fire countdown `generation`: reveal and drop the countdown, but only
    /// if it is still the active one. Returns whether it fired.
    pub fn expire_countdown(&self, generation: u64) -> bool {
        let mut state = self.write();
        let current = state
            .timer
            .is_some_and(|timer| timer.generation == generation);
        if current {
            state.timer = None;
            state.revealed = true;
        }
        current
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::transport::SessionHandle;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct CountingHandle {
        id: ConnectionId,
        terminations: AtomicUsize,
    }

    impl CountingHandle {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::new(),
                terminations: AtomicUsize::new(0),
            })
        }

        fn terminations(&self) -> usize {
            self.terminations.load(Ordering::SeqCst)
        }
    }

    impl SessionHandle for CountingHandle {
        fn id(&self) -> ConnectionId {
            self.id
        }

        fn origin(&self) -> IpAddr {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }

        fn terminate(&self) {
            self.terminations.fetch_add(1, Ordering::SeqCst);
        }

        fn is_terminated(&self) -> bool {
            self.terminations() > 0
        }
    }

    fn registry_with(names: &[&str]) -> Registry {
        let registry = Registry::default();
        for name in names {
            registry
                .register_participant(name, CountingHandle::new())
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_new_participant_has_no_vote() {
        let registry = registry_with(&["alice"]);
        let snapshot = registry.snapshot();
        let alice = snapshot.participant("alice").unwrap();
        assert_eq!(alice.vote, None);
        assert!(!alice.has_voted);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = registry_with(&["alice"]);
        let err = registry
            .register_participant("alice", CountingHandle::new())
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::NameTaken {
                name: "alice".to_string()
            }
        );
        assert_eq!(registry.participant_count(), 1);
    }

    #[test]
    fn test_registration_respects_participant_cap() {
        let registry = Registry::new(2);
        registry
            .register_participant("alice", CountingHandle::new())
            .unwrap();
        registry
            .register_participant("bob", CountingHandle::new())
            .unwrap();
        let err = registry
            .register_participant("carol", CountingHandle::new())
            .unwrap_err();
        assert_eq!(err, RegistryError::SessionFull { limit: 2 });

        registry.remove_participant("bob");
        assert!(registry
            .register_participant("carol", CountingHandle::new())
            .is_ok());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = registry_with(&["alice"]);
        assert!(registry.remove_participant("alice"));
        assert!(!registry.remove_participant("alice"));
        assert!(!registry.contains("alice"));
    }

    #[test]
    fn test_owned_removal_spares_new_holder() {
        let registry = Registry::default();
        let old = CountingHandle::new();
        registry
            .register_participant("alice", Arc::clone(&old) as SharedHandle)
            .unwrap();
        registry.disconnect_all();

        let new = CountingHandle::new();
        registry
            .register_participant("alice", Arc::clone(&new) as SharedHandle)
            .unwrap();

        assert!(!registry.remove_participant_owned("alice", old.id));
        assert!(registry.contains("alice"));
        assert!(registry.remove_participant_owned("alice", new.id));
    }

    #[test]
    fn test_vote_ignored_after_reveal() {
        let registry = registry_with(&["alice", "bob"]);
        assert!(registry.cast_vote("alice", "5"));
        assert!(registry.reveal());
        assert!(!registry.cast_vote("bob", "8"));
        assert!(!registry.cast_vote("alice", "13"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.participant("alice").unwrap().vote.as_deref(), Some("5"));
        assert!(!snapshot.participant("bob").unwrap().has_voted);
    }

    #[test]
    fn test_vote_for_unknown_name_is_noop() {
        let registry = registry_with(&["alice"]);
        assert!(!registry.cast_vote("mallory", "1"));
        assert_eq!(registry.snapshot().voted_count(), 0);
    }

    #[test]
    fn test_reveal_is_idempotent() {
        let registry = Registry::default();
        assert!(registry.reveal());
        assert!(!registry.reveal());
        assert_eq!(registry.snapshot().phase(), RoundPhase::Revealed);
    }

    #[test]
    fn test_clear_resets_votes_and_reveal() {
        let registry = registry_with(&["alice", "bob"]);
        registry.cast_vote("alice", "3");
        registry.cast_vote("bob", "?");
        registry.reveal();

        registry.clear();

        let snapshot = registry.snapshot();
        assert!(!snapshot.revealed);
        assert_eq!(snapshot.participant_count(), 2);
        assert!(snapshot
            .participants
            .iter()
            .all(|p| p.vote.is_none() && !p.has_voted));
    }

    #[test]
    fn test_snapshot_is_sorted_by_name() {
        let registry = registry_with(&["zoe", "alice", "Mike", "bob"]);
        let names: Vec<String> = registry
            .snapshot()
            .participants
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Mike", "alice", "bob", "zoe"]);
    }

    #[test]
    fn test_snapshot_is_detached_from_registry() {
        let registry = registry_with(&["alice"]);
        let before = registry.snapshot();
        registry.cast_vote("alice", "8");
        assert!(!before.participant("alice").unwrap().has_voted);
    }

    #[test]
    fn test_disconnect_all_terminates_each_participant_once() {
        let registry = Registry::default();
        let alice = CountingHandle::new();
        let bob = CountingHandle::new();
        registry
            .register_participant("alice", Arc::clone(&alice) as SharedHandle)
            .unwrap();
        registry
            .register_participant("bob", Arc::clone(&bob) as SharedHandle)
            .unwrap();
        let facilitator = CountingHandle::new();
        registry.claim_facilitator(Arc::clone(&facilitator) as SharedHandle);

        assert_eq!(registry.disconnect_all(), 2);
        assert_eq!(registry.disconnect_all(), 0);

        assert_eq!(registry.participant_count(), 0);
        assert_eq!(alice.terminations(), 1);
        assert_eq!(bob.terminations(), 1);
        assert_eq!(facilitator.terminations(), 0);
        assert!(registry.facilitator_present());
    }

    #[test]
    fn test_single_facilitator() {
        let registry = Registry::default();
        let first = CountingHandle::new();
        let second = CountingHandle::new();

        assert_eq!(
            registry.claim_facilitator(Arc::clone(&first) as SharedHandle),
            FacilitatorClaim::Granted
        );
        assert_eq!(
            registry.claim_facilitator(Arc::clone(&second) as SharedHandle),
            FacilitatorClaim::Denied
        );

        // A stale release from the denied connection must not free the slot.
        assert!(!registry.release_facilitator(second.id));
        assert!(registry.facilitator_present());

        assert!(registry.release_facilitator(first.id));
        assert!(!registry.facilitator_present());
        assert_eq!(
            registry.claim_facilitator(second as SharedHandle),
            FacilitatorClaim::Granted
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_generation_supersedes() {
        let registry = registry_with(&["alice"]);
        let first = registry.begin_countdown(Duration::from_secs(30));
        let second = registry.begin_countdown(Duration::from_secs(15));

        assert!(!registry.expire_countdown(first));
        assert!(!registry.snapshot().revealed);

        assert!(registry.expire_countdown(second));
        let snapshot = registry.snapshot();
        assert!(snapshot.revealed);
        assert!(snapshot.countdown.is_none());

        // Firing twice has no further effect.
        assert!(!registry.expire_countdown(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_countdown_clears_round() {
        let registry = registry_with(&["alice"]);
        registry.cast_vote("alice", "5");
        registry.reveal();

        registry.begin_countdown(Duration::from_secs(60));

        let snapshot = registry.snapshot();
        assert!(!snapshot.revealed);
        assert_eq!(snapshot.voted_count(), 0);
        let countdown = snapshot.countdown.unwrap();
        assert_eq!(countdown.duration, Duration::from_secs(60));
        assert_eq!(
            countdown.remaining_at(Instant::now()),
            Duration::from_secs(60)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_invalidates_countdown() {
        let registry = Registry::default();
        let generation = registry.begin_countdown(Duration::from_secs(15));
        registry.clear();
        assert!(!registry.expire_countdown(generation));
        assert!(!registry.snapshot().revealed);
    }

    #[test]
    fn test_terminate_all_includes_facilitator() {
        let registry = Registry::default();
        let alice = CountingHandle::new();
        let facilitator = CountingHandle::new();
        registry
            .register_participant("alice", Arc::clone(&alice) as SharedHandle)
            .unwrap();
        registry.claim_facilitator(Arc::clone(&facilitator) as SharedHandle);

        assert_eq!(registry.terminate_all(), 2);
        assert_eq!(alice.terminations(), 1);
        assert_eq!(facilitator.terminations(), 1);
        assert!(registry.contains("alice"));
    }

    #[test]
    fn test_summary_uses_only_cast_votes() {
        let registry = registry_with(&["alice", "bob", "carol"]);
        registry.cast_vote("alice", "2");
        registry.cast_vote("bob", "3");
        let summary = registry.snapshot().summary();
        assert_eq!(summary.total_votes, 2);
        assert_eq!(summary.median_label(), "2.5");
    }
}
