//! Round lifecycle tests against the coordinator, without sockets.
//!
//! Connections are stood in for by `MockSessionHandle`, so every
//! termination the core issues can be counted.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use showdown::admission::AdmissionLimits;
use showdown::coordinator::{CoordinatorSettings, FacilitatorLease, Role, SessionCoordinator};
use showdown::errors::ShowdownError;
use showdown::registry::{RegistryError, RoundPhase};
use showdown_test_utils::{MockSessionHandle, TestKeyPair};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Helpers
// ============================================================================

fn coordinator_with_keys(keys_path: PathBuf, max_participants: usize) -> Arc<SessionCoordinator> {
    SessionCoordinator::new(
        CoordinatorSettings {
            admission: AdmissionLimits::default(),
            max_participants,
            authorized_keys_path: keys_path,
        },
        CancellationToken::new(),
    )
}

fn coordinator(max_participants: usize) -> Arc<SessionCoordinator> {
    coordinator_with_keys(PathBuf::from("/nonexistent/showdown_keys"), max_participants)
}

fn authorized_keys_file(keys: &[&TestKeyPair]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for key in keys {
        writeln!(file, "{}", key.authorized_key_line()).unwrap();
    }
    file.flush().unwrap();
    file
}

async fn claim_facilitator(
    coordinator: &Arc<SessionCoordinator>,
    keys: &TestKeyPair,
    handle: &Arc<MockSessionHandle>,
) -> Result<FacilitatorLease, ShowdownError> {
    match coordinator
        .resolve_role(Some(&keys.public_key()), handle.shared())
        .await?
    {
        Role::Facilitator(lease) => Ok(lease),
        Role::Participant => panic!("authorized key should resolve to facilitator"),
    }
}

// ============================================================================
// Joining
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_with_same_name_admit_one() {
    let coordinator = coordinator(15);

    let attempts: Vec<_> = (0..16)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                let handle = MockSessionHandle::new();
                coordinator.join("alice", handle.shared())
            })
        })
        .collect();

    let mut leases = Vec::new();
    let mut taken = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(lease) => leases.push(lease),
            Err(ShowdownError::InvalidName(_) | ShowdownError::Registration(_)) => taken += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(leases.len(), 1, "exactly one join should win");
    assert_eq!(taken, 15);
    assert_eq!(coordinator.registry().participant_count(), 1);
}

#[tokio::test]
async fn test_join_trims_and_validates_names() {
    let coordinator = coordinator(15);

    let lease = coordinator
        .join("  alice  ", MockSessionHandle::new().shared())
        .unwrap();
    assert_eq!(lease.name(), "alice");

    for rejected in ["a", "admin", "bob!", "alice"] {
        let err = coordinator
            .join(rejected, MockSessionHandle::new().shared())
            .unwrap_err();
        assert!(err.is_retryable(), "{rejected:?} should be retryable: {err}");
    }
}

#[tokio::test]
async fn test_session_full_rejects_join() {
    let coordinator = coordinator(2);
    let _alice = coordinator.join("alice", MockSessionHandle::new().shared()).unwrap();
    let _bob = coordinator.join("bob", MockSessionHandle::new().shared()).unwrap();

    let err = coordinator
        .join("carol", MockSessionHandle::new().shared())
        .unwrap_err();
    assert!(matches!(
        err,
        ShowdownError::Registration(RegistryError::SessionFull { limit: 2 })
    ));
    assert_eq!(
        err.client_message(),
        "session is full (2 participants), please try again later"
    );
}

#[tokio::test]
async fn test_dropping_lease_frees_name() {
    let coordinator = coordinator(15);
    let lease = coordinator.join("alice", MockSessionHandle::new().shared()).unwrap();
    drop(lease);

    assert!(!coordinator.registry().contains("alice"));
    let again = coordinator.join("alice", MockSessionHandle::new().shared());
    assert!(again.is_ok());
}

// ============================================================================
// Voting rounds
// ============================================================================

#[tokio::test]
async fn test_full_round_reveal_and_clear() {
    let keys = TestKeyPair::from_seed(1);
    let file = authorized_keys_file(&[&keys]);
    let coordinator = coordinator_with_keys(file.path().to_path_buf(), 15);

    let facilitator = claim_facilitator(&coordinator, &keys, &MockSessionHandle::new())
        .await
        .unwrap();
    let alice = coordinator.join("alice", MockSessionHandle::new().shared()).unwrap();
    let bob = coordinator.join("bob", MockSessionHandle::new().shared()).unwrap();
    let _carol = coordinator.join("carol", MockSessionHandle::new().shared()).unwrap();

    assert!(alice.vote("3"));
    assert!(alice.vote("5"), "changing a vote before reveal is allowed");
    assert!(bob.vote("8"));

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.phase(), RoundPhase::Voting);
    assert_eq!(snapshot.voted_count(), 2);
    assert_eq!(snapshot.participant_count(), 3);

    facilitator.reveal();
    assert!(!bob.vote("1"), "votes are locked after reveal");

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.phase(), RoundPhase::Revealed);
    assert_eq!(snapshot.participant("alice").unwrap().vote.as_deref(), Some("5"));
    assert_eq!(snapshot.participant("bob").unwrap().vote.as_deref(), Some("8"));
    assert_eq!(snapshot.participant("carol").unwrap().vote, None);

    let summary = snapshot.summary();
    assert!((summary.average - 6.5).abs() < 1e-9);
    assert_eq!(summary.total_votes, 2);

    facilitator.clear();
    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.phase(), RoundPhase::Voting);
    assert_eq!(snapshot.voted_count(), 0);
    assert_eq!(snapshot.participant_count(), 3, "clear keeps participants");
    assert!(alice.vote("2"));
}

// ============================================================================
// Facilitator
// ============================================================================

#[tokio::test]
async fn test_second_facilitator_is_refused() {
    let keys = TestKeyPair::from_seed(1);
    let file = authorized_keys_file(&[&keys]);
    let coordinator = coordinator_with_keys(file.path().to_path_buf(), 15);

    let _first = claim_facilitator(&coordinator, &keys, &MockSessionHandle::new())
        .await
        .unwrap();
    let err = claim_facilitator(&coordinator, &keys, &MockSessionHandle::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ShowdownError::FacilitatorActive));
    assert_eq!(err.client_message(), "A facilitator is already connected");
}

#[tokio::test]
async fn test_unlisted_key_resolves_to_participant() {
    let listed = TestKeyPair::from_seed(1);
    let unlisted = TestKeyPair::from_seed(2);
    let file = authorized_keys_file(&[&listed]);
    let coordinator = coordinator_with_keys(file.path().to_path_buf(), 15);

    let role = coordinator
        .resolve_role(Some(&unlisted.public_key()), MockSessionHandle::new().shared())
        .await
        .unwrap();
    assert!(matches!(role, Role::Participant));
    assert!(!coordinator.registry().facilitator_present());
}

#[tokio::test]
async fn test_authorized_keys_are_reread() {
    let keys = TestKeyPair::from_seed(1);
    let mut file = authorized_keys_file(&[]);
    let coordinator = coordinator_with_keys(file.path().to_path_buf(), 15);

    let role = coordinator
        .resolve_role(Some(&keys.public_key()), MockSessionHandle::new().shared())
        .await
        .unwrap();
    assert!(matches!(role, Role::Participant));

    writeln!(file, "{}", keys.authorized_key_line()).unwrap();
    file.flush().unwrap();

    let lease = claim_facilitator(&coordinator, &keys, &MockSessionHandle::new()).await;
    assert!(lease.is_ok(), "key added to the file should now be accepted");
}

#[tokio::test]
async fn test_disconnect_all_terminates_each_participant_once() {
    let keys = TestKeyPair::from_seed(1);
    let file = authorized_keys_file(&[&keys]);
    let coordinator = coordinator_with_keys(file.path().to_path_buf(), 15);

    let facilitator_handle = MockSessionHandle::new();
    let facilitator = claim_facilitator(&coordinator, &keys, &facilitator_handle)
        .await
        .unwrap();

    let alice_handle = MockSessionHandle::new();
    let bob_handle = MockSessionHandle::new();
    let alice = coordinator.join("alice", alice_handle.shared()).unwrap();
    let _bob = coordinator.join("bob", bob_handle.shared()).unwrap();
    assert!(alice.vote("5"));
    facilitator.reveal();

    assert_eq!(facilitator.disconnect_all(), 2);

    assert_eq!(alice_handle.termination_count(), 1);
    assert_eq!(bob_handle.termination_count(), 1);
    assert_eq!(facilitator_handle.termination_count(), 0);
    assert!(!alice.is_registered());

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.participant_count(), 0);
    assert!(!snapshot.revealed, "disconnect all starts a fresh round");
    assert!(snapshot.facilitator_present);

    // A second call finds nobody to terminate.
    assert_eq!(facilitator.disconnect_all(), 0);
    assert_eq!(alice_handle.termination_count(), 1);
}

#[tokio::test]
async fn test_stale_lease_does_not_remove_successor() {
    let keys = TestKeyPair::from_seed(1);
    let file = authorized_keys_file(&[&keys]);
    let coordinator = coordinator_with_keys(file.path().to_path_buf(), 15);
    let facilitator = claim_facilitator(&coordinator, &keys, &MockSessionHandle::new())
        .await
        .unwrap();

    let old = coordinator.join("alice", MockSessionHandle::new().shared()).unwrap();
    facilitator.disconnect_all();

    let successor = coordinator.join("alice", MockSessionHandle::new().shared()).unwrap();
    drop(old);

    assert!(successor.is_registered());
    assert!(coordinator.registry().contains("alice"));
}

#[tokio::test]
async fn test_facilitator_leaving_disconnects_everyone() {
    let keys = TestKeyPair::from_seed(1);
    let file = authorized_keys_file(&[&keys]);
    let coordinator = coordinator_with_keys(file.path().to_path_buf(), 15);

    let facilitator = claim_facilitator(&coordinator, &keys, &MockSessionHandle::new())
        .await
        .unwrap();
    let alice_handle = MockSessionHandle::new();
    let _alice = coordinator.join("alice", alice_handle.shared()).unwrap();

    drop(facilitator);

    assert_eq!(alice_handle.termination_count(), 1);
    assert_eq!(coordinator.registry().participant_count(), 0);
    assert!(!coordinator.registry().facilitator_present());

    // The slot is free for the next facilitator.
    let next = claim_facilitator(&coordinator, &keys, &MockSessionHandle::new()).await;
    assert!(next.is_ok());
}

#[tokio::test]
async fn test_begin_shutdown_terminates_everyone() {
    let keys = TestKeyPair::from_seed(1);
    let file = authorized_keys_file(&[&keys]);
    let coordinator = coordinator_with_keys(file.path().to_path_buf(), 15);

    let facilitator_handle = MockSessionHandle::new();
    let _facilitator = claim_facilitator(&coordinator, &keys, &facilitator_handle)
        .await
        .unwrap();
    let alice_handle = MockSessionHandle::new();
    let _alice = coordinator.join("alice", alice_handle.shared()).unwrap();

    assert_eq!(coordinator.begin_shutdown(), 2);
    assert!(coordinator.shutdown_token().is_cancelled());
    assert_eq!(alice_handle.termination_count(), 1);
    assert_eq!(facilitator_handle.termination_count(), 1);
}
