//! Per-connection session driver.
//!
//! A connection moves through name entry into the participant stage, or
//! straight into the facilitator stage when it presented an authorized key.
//! Each stage waits on one [`SessionEvent`] at a time and dispatches on it
//! exhaustively. Views are re-rendered after every event and written only
//! when they differ from the last frame sent.

use crate::auth::PublicKey;
use crate::coordinator::{FacilitatorLease, ParticipantLease, Role, SessionCoordinator};
use crate::errors::ShowdownError;
use crate::observability::metrics;
use crate::round::{FacilitatorCommand, ParticipantCommand, POINT_OPTIONS};
use crate::timer::Notice;
use crate::transport::{SessionHandle, TokenSessionHandle};
use crate::view;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_stream::{Stream, StreamExt};
use tokio_util::codec::LinesCodecError;
use tracing::{debug, instrument};

/// Written after every frame so line clients can tell frames apart.
pub const FRAME_END: &str = "--\n";

/// Everything a session stage reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// One line of client input.
    Input(String),
    /// Refresh tick.
    Tick,
    /// A countdown revealed the round.
    TimerExpired,
    /// The connection was told to terminate (disconnect-all, facilitator
    /// left, shutdown).
    Terminated,
    /// The client closed its side.
    Closed,
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Quit,
    Terminated,
    ShuttingDown,
    Closed,
}

impl SessionEnd {
    /// Text for the `Session closed: <reason>` line.
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            SessionEnd::Quit => "goodbye",
            SessionEnd::Terminated => "disconnected by facilitator",
            SessionEnd::ShuttingDown => "server shutting down",
            SessionEnd::Closed => "connection closed",
        }
    }
}

/// Records the session duration under the final role, also when the
/// session future is dropped by the lifetime limit.
struct DurationGuard {
    role: &'static str,
    started: Instant,
}

impl Drop for DurationGuard {
    fn drop(&mut self) {
        metrics::record_session_duration(self.role, self.started.elapsed());
    }
}

struct Session<'io, L, W> {
    coordinator: Arc<SessionCoordinator>,
    handle: Arc<TokenSessionHandle>,
    notices: broadcast::Receiver<Notice>,
    lines: &'io mut L,
    writer: &'io mut W,
    pending: Option<String>,
    last_frame: Option<String>,
    duration: DurationGuard,
}

/// Drive one connection until it quits, is terminated or fails.
///
/// `pending_input` is a line already read during the handshake that must be
/// treated as the first input. `lines` and `writer` are borrowed so the
/// caller can still write a close line after this future is dropped.
#[instrument(
    skip_all,
    name = "session",
    fields(connection = %handle.id(), origin = %handle.origin())
)]
pub async fn run_session<L, W>(
    coordinator: Arc<SessionCoordinator>,
    handle: Arc<TokenSessionHandle>,
    credential: Option<PublicKey>,
    pending_input: Option<String>,
    lines: &mut L,
    writer: &mut W,
) -> Result<SessionEnd, ShowdownError>
where
    L: Stream<Item = Result<String, LinesCodecError>> + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let notices = coordinator.subscribe();
    let mut session = Session {
        coordinator,
        handle,
        notices,
        lines,
        writer,
        pending: pending_input,
        last_frame: None,
        duration: DurationGuard {
            role: "none",
            started: Instant::now(),
        },
    };

    let role = session
        .coordinator
        .resolve_role(credential.as_ref(), session.shared_handle())
        .await?;

    match role {
        Role::Facilitator(lease) => {
            session.duration.role = "facilitator";
            session.facilitator_stage(&lease).await
        }
        Role::Participant => match session.name_entry_stage().await? {
            Entry::Joined(lease) => {
                session.duration.role = "participant";
                session.participant_stage(&lease).await
            }
            Entry::Ended(end) => Ok(end),
        },
    }
}

enum Entry {
    Joined(ParticipantLease),
    Ended(SessionEnd),
}

impl<L, W> Session<'_, L, W>
where
    L: Stream<Item = Result<String, LinesCodecError>> + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn shared_handle(&self) -> Arc<dyn SessionHandle> {
        Arc::clone(&self.handle) as Arc<dyn SessionHandle>
    }

    fn end_for_termination(&self) -> SessionEnd {
        if self.coordinator.shutdown_token().is_cancelled() {
            SessionEnd::ShuttingDown
        } else {
            SessionEnd::Terminated
        }
    }

    async fn next_event(&mut self) -> Result<SessionEvent, ShowdownError> {
        if let Some(line) = self.pending.take() {
            return Ok(SessionEvent::Input(line));
        }

        tokio::select! {
            biased;
            () = self.handle.terminated() => Ok(SessionEvent::Terminated),
            line = self.lines.next() => match line {
                Some(Ok(line)) => Ok(SessionEvent::Input(line)),
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    Err(ShowdownError::Protocol("line too long".to_string()))
                }
                Some(Err(LinesCodecError::Io(e))) => Err(e.into()),
                None => Ok(SessionEvent::Closed),
            },
            notice = self.notices.recv() => Ok(match notice {
                Ok(Notice::Tick) | Err(RecvError::Lagged(_)) => SessionEvent::Tick,
                Ok(Notice::TimerExpired) => SessionEvent::TimerExpired,
                // The sender lives as long as the coordinator.
                Err(RecvError::Closed) => SessionEvent::Terminated,
            }),
        }
    }

    async fn render(&mut self, frame: String) -> Result<(), ShowdownError> {
        if self.last_frame.as_deref() == Some(frame.as_str()) {
            return Ok(());
        }
        let writer = &mut *self.writer;
        let handle = &self.handle;
        let write = async {
            writer.write_all(frame.as_bytes()).await?;
            writer.write_all(FRAME_END.as_bytes()).await?;
            writer.flush().await
        };
        // A peer that stopped reading must not delay termination; the next
        // event reports it.
        tokio::select! {
            biased;
            () = handle.terminated() => return Ok(()),
            written = write => written?,
        }
        self.last_frame = Some(frame);
        Ok(())
    }

    async fn name_entry_stage(&mut self) -> Result<Entry, ShowdownError> {
        let mut error: Option<String> = None;
        loop {
            self.render(view::name_entry(error.as_deref())).await?;

            match self.next_event().await? {
                SessionEvent::Input(line) => {
                    match self.coordinator.join(&line, self.shared_handle()) {
                        Ok(lease) => return Ok(Entry::Joined(lease)),
                        Err(e) if e.is_retryable() => {
                            debug!(target: "showdown.session", error = %e, "Name rejected");
                            error = Some(e.client_message());
                        }
                        Err(e) => return Err(e),
                    }
                }
                SessionEvent::Tick | SessionEvent::TimerExpired => {}
                SessionEvent::Terminated => {
                    return Ok(Entry::Ended(self.end_for_termination()))
                }
                SessionEvent::Closed => return Ok(Entry::Ended(SessionEnd::Closed)),
            }
        }
    }

    async fn participant_stage(
        &mut self,
        lease: &ParticipantLease,
    ) -> Result<SessionEnd, ShowdownError> {
        let mut hint: Option<String> = None;
        loop {
            let mut frame = view::participant(lease.name(), &self.coordinator.snapshot());
            if let Some(hint) = &hint {
                frame.push_str(hint);
                frame.push('\n');
            }
            self.render(frame).await?;

            match self.next_event().await? {
                SessionEvent::Input(line) => match ParticipantCommand::parse(&line) {
                    Some(ParticipantCommand::Vote(token)) => {
                        hint = (!lease.vote(&token))
                            .then(|| "Votes are locked until the next round".to_string());
                    }
                    Some(ParticipantCommand::Quit) => return Ok(SessionEnd::Quit),
                    None => {
                        hint = Some(format!("Choose one of: {}", POINT_OPTIONS.join(", ")));
                    }
                },
                SessionEvent::Tick | SessionEvent::TimerExpired => {}
                SessionEvent::Terminated => return Ok(self.end_for_termination()),
                SessionEvent::Closed => return Ok(SessionEnd::Closed),
            }
        }
    }

    async fn facilitator_stage(
        &mut self,
        lease: &FacilitatorLease,
    ) -> Result<SessionEnd, ShowdownError> {
        let mut hint: Option<&'static str> = None;
        loop {
            let now = tokio::time::Instant::now();
            let mut frame = view::facilitator(&self.coordinator.snapshot(), now);
            if let Some(hint) = hint {
                frame.push_str(hint);
                frame.push('\n');
            }
            self.render(frame).await?;

            match self.next_event().await? {
                SessionEvent::Input(line) => {
                    hint = None;
                    match FacilitatorCommand::parse(&line) {
                        Some(FacilitatorCommand::Reveal) => lease.reveal(),
                        Some(FacilitatorCommand::Clear) => lease.clear(),
                        Some(FacilitatorCommand::DisconnectAll) => {
                            lease.disconnect_all();
                        }
                        Some(FacilitatorCommand::StartCountdown(duration)) => {
                            lease.start_countdown(duration);
                        }
                        Some(FacilitatorCommand::Quit) => return Ok(SessionEnd::Quit),
                        None => hint = Some("Unknown command"),
                    }
                }
                SessionEvent::Tick | SessionEvent::TimerExpired => {}
                SessionEvent::Terminated => return Ok(self.end_for_termination()),
                SessionEvent::Closed => return Ok(SessionEnd::Closed),
            }
        }
    }
}
