//! Countdown behavior through the facilitator lease.
//!
//! Uses tokio's paused clock, so every test runs instantly and timer
//! ordering is exact.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use showdown::admission::AdmissionLimits;
use showdown::coordinator::{CoordinatorSettings, FacilitatorLease, Role, SessionCoordinator};
use showdown::registry::RoundPhase;
use showdown::timer::Notice;
use showdown_test_utils::{MockSessionHandle, TestKeyPair};
use tempfile::NamedTempFile;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;

struct Fixture {
    coordinator: Arc<SessionCoordinator>,
    facilitator: FacilitatorLease,
    _keys_file: NamedTempFile,
}

async fn fixture() -> Fixture {
    let keys = TestKeyPair::from_seed(1);
    let mut keys_file = NamedTempFile::new().unwrap();
    writeln!(keys_file, "{}", keys.authorized_key_line()).unwrap();
    keys_file.flush().unwrap();

    let coordinator = SessionCoordinator::new(
        CoordinatorSettings {
            admission: AdmissionLimits::default(),
            max_participants: 15,
            authorized_keys_path: keys_file.path().to_path_buf(),
        },
        CancellationToken::new(),
    );
    let role = coordinator
        .resolve_role(Some(&keys.public_key()), MockSessionHandle::new().shared())
        .await
        .unwrap();
    let Role::Facilitator(facilitator) = role else {
        panic!("expected facilitator role");
    };

    Fixture {
        coordinator,
        facilitator,
        _keys_file: keys_file,
    }
}

/// Sleep on the paused clock. Spawned countdown tasks get polled first, so
/// their deadlines are set before time moves.
async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
    tokio::task::yield_now().await;
}

#[tokio::test(start_paused = true)]
async fn test_countdown_reveals_on_expiry() {
    let f = fixture().await;
    let mut notices = f.coordinator.subscribe();
    let alice = f
        .coordinator
        .join("alice", MockSessionHandle::new().shared())
        .unwrap();

    f.facilitator.start_countdown(Duration::from_secs(15));
    assert!(alice.vote("5"));

    advance(Duration::from_secs(14)).await;
    assert_eq!(f.coordinator.snapshot().phase(), RoundPhase::Voting);

    advance(Duration::from_secs(2)).await;
    let snapshot = f.coordinator.snapshot();
    assert_eq!(snapshot.phase(), RoundPhase::Revealed);
    assert_eq!(snapshot.participant("alice").unwrap().vote.as_deref(), Some("5"));
    assert_eq!(notices.try_recv().unwrap(), Notice::TimerExpired);
}

#[tokio::test(start_paused = true)]
async fn test_starting_countdown_clears_round() {
    let f = fixture().await;
    let alice = f
        .coordinator
        .join("alice", MockSessionHandle::new().shared())
        .unwrap();
    assert!(alice.vote("3"));
    f.facilitator.reveal();

    f.facilitator.start_countdown(Duration::from_secs(30));

    let snapshot = f.coordinator.snapshot();
    assert_eq!(snapshot.phase(), RoundPhase::Voting);
    assert_eq!(snapshot.voted_count(), 0);
    assert_eq!(
        snapshot.countdown.unwrap().duration,
        Duration::from_secs(30)
    );
}

#[tokio::test(start_paused = true)]
async fn test_newer_countdown_supersedes_older() {
    let f = fixture().await;
    let mut notices = f.coordinator.subscribe();

    f.facilitator.start_countdown(Duration::from_secs(60));
    advance(Duration::from_secs(10)).await;
    f.facilitator.start_countdown(Duration::from_secs(15));

    advance(Duration::from_secs(16)).await;
    assert_eq!(f.coordinator.snapshot().phase(), RoundPhase::Revealed);
    assert_eq!(notices.try_recv().unwrap(), Notice::TimerExpired);

    // A fresh round, then let the original 60s deadline pass: it must not
    // reveal again.
    f.facilitator.clear();
    advance(Duration::from_secs(60)).await;
    assert_eq!(f.coordinator.snapshot().phase(), RoundPhase::Voting);
    assert_eq!(notices.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test(start_paused = true)]
async fn test_clear_cancels_countdown() {
    let f = fixture().await;

    f.facilitator.start_countdown(Duration::from_secs(15));
    advance(Duration::from_secs(5)).await;
    f.facilitator.clear();
    assert!(f.coordinator.snapshot().countdown.is_none());

    advance(Duration::from_secs(20)).await;
    assert_eq!(f.coordinator.snapshot().phase(), RoundPhase::Voting);
}

#[tokio::test(start_paused = true)]
async fn test_manual_reveal_keeps_countdown_running() {
    let f = fixture().await;

    f.facilitator.start_countdown(Duration::from_secs(30));
    advance(Duration::from_secs(5)).await;
    f.facilitator.reveal();

    let snapshot = f.coordinator.snapshot();
    assert_eq!(snapshot.phase(), RoundPhase::Revealed);
    assert!(snapshot.countdown.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_facilitator_leaving_cancels_countdown() {
    let f = fixture().await;
    let Fixture {
        coordinator,
        facilitator,
        _keys_file,
    } = f;

    facilitator.start_countdown(Duration::from_secs(15));
    drop(facilitator);

    assert!(coordinator.snapshot().countdown.is_none());
    advance(Duration::from_secs(20)).await;
    assert_eq!(coordinator.snapshot().phase(), RoundPhase::Voting);
}
