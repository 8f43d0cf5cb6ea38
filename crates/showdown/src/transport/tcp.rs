//! Line-oriented TCP transport.
//!
//! Per connection:
//!
//! 1. Admission. Rejected connections get a single close line.
//! 2. Greeting: `showdown/1 <host-key> <challenge> <host-signature>`.
//! 3. The first client line is either a credential
//!    (`auth ssh-ed25519 <blob> <signature>`) or ordinary input, which is
//!    handed to the session as its first line.
//! 4. The session runs under the admission lifetime limit.
//! 5. A final `Session closed: <reason>` line, then the socket is shut down.
//!
//! The admission slot is owned by the connection task, so it is released on
//! every exit path.

use crate::admission::AdmissionSlot;
use crate::auth::{Challenge, HostKey, PresentedCredential, PublicKey};
use crate::coordinator::SessionCoordinator;
use crate::errors::ShowdownError;
use crate::observability::metrics;
use crate::session::{run_session, SessionEnd};
use crate::transport::{SessionHandle, TokenSessionHandle};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::rand::SystemRandom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::{Stream, StreamExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Protocol identifier sent first on every admitted connection.
pub const PROTOCOL_VERSION: &str = "showdown/1";

/// Longest accepted input line in bytes.
pub const MAX_LINE_LENGTH: usize = 256;

/// Prefix of the last line written before closing.
pub const CLOSE_PREFIX: &str = "Session closed: ";

/// Longest wait for the close line to reach a peer that stopped reading.
pub const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Bind the session listener.
pub async fn bind(address: &str) -> Result<TcpListener, ShowdownError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| ShowdownError::Bind {
            address: address.to_string(),
            source,
        })
}

/// Everything a connection task needs, shared across connections.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    coordinator: Arc<SessionCoordinator>,
    host_key: Arc<HostKey>,
    host_public: PublicKey,
    rng: SystemRandom,
    tracker: TaskTracker,
}

impl TcpTransport {
    pub fn new(
        coordinator: Arc<SessionCoordinator>,
        host_key: Arc<HostKey>,
        tracker: TaskTracker,
    ) -> Result<Self, ShowdownError> {
        let host_public = host_key.public_key()?;
        Ok(Self {
            coordinator,
            host_key,
            host_public,
            rng: SystemRandom::new(),
            tracker,
        })
    }

    /// Accept connections until the coordinator's shutdown token fires.
    /// Connection tasks are spawned on the tracker.
    pub async fn serve(self, listener: TcpListener) {
        let shutdown = self.coordinator.shutdown_token().clone();
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!(target: "showdown.transport", "Listener shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept(stream, peer),
                    Err(e) => {
                        warn!(target: "showdown.transport", error = %e, "Accept failed");
                    }
                },
            }
        }
    }

    fn accept(&self, stream: TcpStream, peer: SocketAddr) {
        let admission = self.coordinator.admission();
        match admission.try_admit(peer.ip()) {
            Ok(slot) => {
                metrics::record_connection_admitted();
                metrics::set_connections_active(admission.active_connections());
                let transport = self.clone();
                self.tracker.spawn(async move {
                    transport.handle_connection(stream, slot).await;
                });
            }
            Err(e) => {
                metrics::record_connection_rejected(e.reason());
                warn!(
                    target: "showdown.transport",
                    origin = %peer.ip(),
                    reason = e.reason(),
                    "Connection rejected"
                );
                let message = e.to_string();
                self.tracker.spawn(async move {
                    let mut stream = stream;
                    let _ = tokio::time::timeout(
                        CLOSE_WRITE_TIMEOUT,
                        write_close_line(&mut stream, &message),
                    )
                    .await;
                });
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, slot: AdmissionSlot) {
        let origin = slot.origin();
        let handle = Arc::new(TokenSessionHandle::new(
            origin,
            self.coordinator.shutdown_token().child_token(),
        ));
        debug!(
            target: "showdown.transport",
            connection = %handle.id(),
            origin = %origin,
            "Connection accepted"
        );

        let (read, mut writer) = stream.into_split();
        let mut lines = FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

        let outcome = self
            .coordinator
            .admission()
            .within_session_limit(self.converse(Arc::clone(&handle), &mut lines, &mut writer))
            .await;

        let reason = match outcome {
            Ok(Ok(end)) => end.reason().to_string(),
            Ok(Err(e)) => {
                debug!(
                    target: "showdown.transport",
                    connection = %handle.id(),
                    error = %e,
                    "Session ended with error"
                );
                e.client_message()
            }
            Err(expired) => {
                metrics::record_session_timeout();
                info!(
                    target: "showdown.transport",
                    connection = %handle.id(),
                    limit_secs = expired.limit.as_secs(),
                    "Session timed out"
                );
                ShowdownError::from(expired).client_message()
            }
        };

        if tokio::time::timeout(CLOSE_WRITE_TIMEOUT, write_close_line(&mut writer, &reason))
            .await
            .is_err()
        {
            debug!(
                target: "showdown.transport",
                connection = %handle.id(),
                "Peer not reading, closing without close line"
            );
        }
        // Both socket halves close here, before the slot is released.
        drop(lines);
        drop(writer);
        drop(slot);
        metrics::set_connections_active(self.coordinator.admission().active_connections());
    }

    /// Handshake, then the session proper.
    async fn converse<L, W>(
        &self,
        handle: Arc<TokenSessionHandle>,
        lines: &mut L,
        writer: &mut W,
    ) -> Result<SessionEnd, ShowdownError>
    where
        L: Stream<Item = Result<String, LinesCodecError>> + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let challenge = Challenge::random(&self.rng)?;
        let greeting = format!(
            "{PROTOCOL_VERSION} {} {} {}\nType your name and press Enter to join.\n",
            STANDARD.encode(self.host_public.as_bytes()),
            challenge.to_hex(),
            STANDARD.encode(self.host_key.sign(&challenge.host_message())),
        );
        writer.write_all(greeting.as_bytes()).await?;
        writer.flush().await?;

        let first = tokio::select! {
            biased;
            () = handle.terminated() => return Ok(SessionEnd::ShuttingDown),
            line = lines.next() => match line {
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    return Err(ShowdownError::Protocol("line too long".to_string()));
                }
                Some(Err(LinesCodecError::Io(e))) => return Err(e.into()),
                None => return Ok(SessionEnd::Closed),
            },
        };

        let (credential, pending) = match PresentedCredential::parse_line(&first) {
            None => (None, Some(first)),
            Some(Ok(presented)) if presented.verify(&challenge, &self.host_public) => {
                (Some(presented.key), None)
            }
            Some(Ok(_)) => {
                warn!(
                    target: "showdown.transport",
                    connection = %handle.id(),
                    "Credential signature did not verify, continuing without credential"
                );
                (None, None)
            }
            Some(Err(e)) => {
                warn!(
                    target: "showdown.transport",
                    connection = %handle.id(),
                    error = %e,
                    "Malformed credential, continuing without credential"
                );
                (None, None)
            }
        };

        run_session(
            Arc::clone(&self.coordinator),
            handle,
            credential,
            pending,
            lines,
            writer,
        )
        .await
    }
}

/// Best effort: the peer may already be gone.
async fn write_close_line<W>(writer: &mut W, reason: &str)
where
    W: AsyncWrite + Unpin,
{
    let line = format!("{CLOSE_PREFIX}{reason}\n");
    if writer.write_all(line.as_bytes()).await.is_ok() {
        let _ = writer.shutdown().await;
    }
}
