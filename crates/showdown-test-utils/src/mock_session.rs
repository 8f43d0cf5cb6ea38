//! Mock connection handle.
//!
//! Lets registry and coordinator tests observe terminations without a
//! socket or a cancellation token.

use showdown::transport::{ConnectionId, SessionHandle, SharedHandle};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// [`SessionHandle`] that records every `terminate` call.
#[derive(Debug)]
pub struct MockSessionHandle {
    id: ConnectionId,
    origin: IpAddr,
    terminations: AtomicUsize,
}

impl Default for MockSessionHandle {
    fn default() -> Self {
        Self::from_origin(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

impl MockSessionHandle {
    /// New handle from 127.0.0.1, wrapped for sharing with the core.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn from_origin(origin: IpAddr) -> Self {
        Self {
            id: ConnectionId::new(),
            origin,
            terminations: AtomicUsize::new(0),
        }
    }

    /// How many times `terminate` has been called.
    pub fn termination_count(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    /// Type-erased clone for passing to the registry.
    pub fn shared(self: &Arc<Self>) -> SharedHandle {
        Arc::clone(self) as SharedHandle
    }
}

impl SessionHandle for MockSessionHandle {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn origin(&self) -> IpAddr {
        self.origin
    }

    fn terminate(&self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
    }

    fn is_terminated(&self) -> bool {
        self.termination_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_terminations() {
        let handle = MockSessionHandle::new();
        assert!(!handle.is_terminated());

        let shared = handle.shared();
        shared.terminate();
        shared.terminate();

        assert!(handle.is_terminated());
        assert_eq!(handle.termination_count(), 2);
    }

    #[test]
    fn test_handles_have_distinct_ids() {
        let a = MockSessionHandle::new();
        let b = MockSessionHandle::new();
        assert_ne!(a.id(), b.id());
    }
}
