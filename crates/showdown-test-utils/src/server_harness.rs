//! Test server harness for end-to-end testing
//!
//! Provides `TestShowdownServer` for spawning a real session listener on a
//! random local port.

use crate::crypto_fixtures::TestKeyPair;
use showdown::admission::AdmissionLimits;
use showdown::coordinator::{CoordinatorSettings, SessionCoordinator};
use showdown::registry::DEFAULT_MAX_PARTICIPANTS;
use showdown::transport::tcp::{self, TcpTransport};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Seed of the host key every harness server uses.
pub const TEST_HOST_SEED: u8 = 200;

/// Builder for [`TestShowdownServer`].
#[derive(Debug, Clone)]
pub struct TestServerBuilder {
    admission: AdmissionLimits,
    max_participants: usize,
    authorized_keys: Vec<String>,
}

impl Default for TestServerBuilder {
    fn default() -> Self {
        Self {
            admission: AdmissionLimits::default(),
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            authorized_keys: Vec::new(),
        }
    }
}

impl TestServerBuilder {
    /// Add `keys` to the authorized-keys file.
    pub fn authorize(mut self, keys: &TestKeyPair) -> Self {
        self.authorized_keys.push(keys.authorized_key_line());
        self
    }

    pub fn max_connections(mut self, limit: usize) -> Self {
        self.admission.max_connections = limit;
        self
    }

    pub fn max_connections_per_origin(mut self, limit: usize) -> Self {
        self.admission.max_connections_per_origin = limit;
        self
    }

    pub fn session_timeout(mut self, limit: Duration) -> Self {
        self.admission.max_session_duration = limit;
        self
    }

    pub fn max_participants(mut self, limit: usize) -> Self {
        self.max_participants = limit;
        self
    }

    /// Spawn the server.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Use the fixed host key from [`TEST_HOST_SEED`]
    /// - Read facilitator keys from a temporary authorized-keys file
    pub async fn spawn(self) -> Result<TestShowdownServer, anyhow::Error> {
        let mut keys_file = NamedTempFile::new()
            .map_err(|e| anyhow::anyhow!("Failed to create authorized-keys file: {}", e))?;
        for line in &self.authorized_keys {
            writeln!(keys_file, "{line}")?;
        }
        keys_file.flush()?;

        let shutdown = CancellationToken::new();
        let coordinator = SessionCoordinator::new(
            CoordinatorSettings {
                admission: self.admission,
                max_participants: self.max_participants,
                authorized_keys_path: keys_file.path().to_path_buf(),
            },
            shutdown.clone(),
        );
        let ticker = coordinator.spawn_ticker();

        let listener = tcp::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let tracker = TaskTracker::new();
        let host_key = Arc::new(TestKeyPair::from_seed(TEST_HOST_SEED).host_key());
        let transport = TcpTransport::new(Arc::clone(&coordinator), host_key, tracker.clone())?;
        let listener_handle = tokio::spawn(transport.serve(listener));

        Ok(TestShowdownServer {
            addr,
            coordinator,
            tracker,
            keys_file,
            _ticker: ticker,
            listener: Some(listener_handle),
        })
    }
}

/// A running server bound to a local port.
///
/// Dropping it cancels the shutdown token, which stops the listener and
/// every session.
pub struct TestShowdownServer {
    addr: SocketAddr,
    coordinator: Arc<SessionCoordinator>,
    tracker: TaskTracker,
    keys_file: NamedTempFile,
    _ticker: JoinHandle<()>,
    listener: Option<JoinHandle<()>>,
}

impl TestShowdownServer {
    pub fn builder() -> TestServerBuilder {
        TestServerBuilder::default()
    }

    /// Spawn with default limits and no facilitator keys.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::builder().spawn().await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    pub fn authorized_keys_path(&self) -> &Path {
        self.keys_file.path()
    }

    /// Replace the authorized-keys file contents while the server runs.
    pub fn rewrite_authorized_keys(&self, lines: &[String]) -> Result<(), anyhow::Error> {
        std::fs::write(self.keys_file.path(), lines.join("\n"))?;
        Ok(())
    }

    /// Wait until `condition` holds on the coordinator, polling briefly.
    pub async fn wait_for(
        &self,
        condition: impl Fn(&SessionCoordinator) -> bool,
    ) -> Result<(), anyhow::Error> {
        tokio::time::timeout(crate::client::READ_TIMEOUT, async {
            while !condition(&self.coordinator) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .map_err(|_| anyhow::anyhow!("Condition not reached before timeout"))
    }

    /// Graceful shutdown: terminate every session, wait for the connection
    /// tasks to finish and for the listener to close.
    pub async fn shutdown(mut self) -> Result<(), anyhow::Error> {
        self.coordinator.begin_shutdown();
        self.tracker.close();
        tokio::time::timeout(crate::client::READ_TIMEOUT, self.tracker.wait())
            .await
            .map_err(|_| anyhow::anyhow!("Connection tasks still running after shutdown"))?;
        if let Some(listener) = self.listener.take() {
            listener.await?;
        }
        Ok(())
    }
}

impl Drop for TestShowdownServer {
    fn drop(&mut self) {
        self.coordinator.shutdown_token().cancel();
    }
}
