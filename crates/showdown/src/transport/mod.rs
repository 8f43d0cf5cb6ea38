//! Transport seam.
//!
//! The session core never touches sockets. It sees each connection only
//! through a [`SessionHandle`]: an identity, an origin address, and a way to
//! terminate it. [`tcp`] is the line-oriented TCP transport the binary uses.

pub mod tcp;

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Opaque identity of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the core may do with a connection it does not own.
///
/// `terminate` must not block: implementations signal the connection's own
/// task, which performs the actual close.
pub trait SessionHandle: Send + Sync + fmt::Debug {
    fn id(&self) -> ConnectionId;

    fn origin(&self) -> IpAddr;

    fn terminate(&self);

    fn is_terminated(&self) -> bool;
}

/// Shared, type-erased handle as stored in the registry.
pub type SharedHandle = Arc<dyn SessionHandle>;

/// [`SessionHandle`] backed by a [`CancellationToken`].
///
/// The connection task selects on [`TokenSessionHandle::terminated`];
/// `terminate` cancels the token.
#[derive(Debug, Clone)]
pub struct TokenSessionHandle {
    id: ConnectionId,
    origin: IpAddr,
    token: CancellationToken,
}

impl TokenSessionHandle {
    #[must_use]
    pub fn new(origin: IpAddr, token: CancellationToken) -> Self {
        Self {
            id: ConnectionId::new(),
            origin,
            token,
        }
    }

    /// Resolves once the connection has been told to terminate.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

impl SessionHandle for TokenSessionHandle {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn origin(&self) -> IpAddr {
        self.origin
    }

    fn terminate(&self) {
        self.token.cancel();
    }

    fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[tokio::test]
    async fn test_token_handle_terminate_wakes_waiter() {
        let handle = TokenSessionHandle::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            CancellationToken::new(),
        );
        assert!(!handle.is_terminated());

        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.terminated().await });

        handle.terminate();
        assert!(handle.is_terminated());
        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_parent_token_cancels_handle() {
        let parent = CancellationToken::new();
        let handle = TokenSessionHandle::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            parent.child_token(),
        );
        parent.cancel();
        assert!(handle.is_terminated());
    }
}
