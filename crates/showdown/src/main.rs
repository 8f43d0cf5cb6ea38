//! Showdown
//!
//! Planning poker session server.
//!
//! # Servers
//!
//! - Line-oriented TCP session listener (default: 0.0.0.0:23234)
//! - HTTP server for health and metrics (default: 127.0.0.1:8081)
//!
//! # Startup Flow
//!
//! 1. Parse CLI flags and load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Load the host key (fatal if missing or invalid)
//! 4. Build the session coordinator and start the refresh ticker
//! 5. Bind the health server and the session listener (fail fast)
//! 6. Wait for shutdown signal
//! 7. Terminate every session and wait up to the grace period

#![warn(clippy::pedantic)]

use std::sync::Arc;

use clap::Parser;
use showdown::auth::HostKey;
use showdown::config::Config;
use showdown::coordinator::{CoordinatorSettings, SessionCoordinator};
use showdown::observability::{health_router, init_metrics_recorder, metrics_router, HealthState};
use showdown::transport::tcp::{self, TcpTransport};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "showdown")]
#[command(version, about = "Planning poker session server")]
struct Args {
    /// Port for the session listener (overrides SHOWDOWN_PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "showdown=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Showdown");

    let mut config = Config::from_env().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;
    if let Some(port) = args.port {
        config = config.with_port(port);
    }

    info!(
        listen_address = %config.listen_address(),
        health_bind_address = %config.health_bind_address,
        host_key_path = %config.host_key_path.display(),
        authorized_keys_path = %config.authorized_keys_path.display(),
        max_connections = config.max_connections,
        max_connections_per_ip = config.max_connections_per_ip,
        max_participants = config.max_participants,
        session_timeout_secs = config.session_timeout.as_secs(),
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let host_key = HostKey::load(&config.host_key_path).map_err(|e| {
        error!(
            path = %config.host_key_path.display(),
            error = %e,
            "Failed to load host key"
        );
        e
    })?;
    let host_key = Arc::new(host_key);

    let shutdown_token = CancellationToken::new();
    let coordinator =
        SessionCoordinator::new(CoordinatorSettings::from(&config), shutdown_token.clone());
    let ticker = coordinator.spawn_ticker();

    // Health and metrics
    let health_state = Arc::new(HealthState::new());
    let app = health_router(Arc::clone(&health_state)).merge(metrics_router(prometheus_handle));

    // Bind both listeners BEFORE spawning to fail fast on bind errors
    let health_listener = tcp::bind(&config.health_bind_address).await.map_err(|e| {
        error!(error = %e, "Failed to bind health server");
        e
    })?;
    let session_listener = tcp::bind(&config.listen_address()).await.map_err(|e| {
        error!(error = %e, "Failed to bind session listener");
        e
    })?;

    let health_shutdown_token = shutdown_token.clone();
    let health_handle = tokio::spawn(async move {
        let server = axum::serve(health_listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    let tracker = TaskTracker::new();
    let transport = TcpTransport::new(Arc::clone(&coordinator), host_key, tracker.clone())?;
    let listener_handle = tokio::spawn(transport.serve(session_listener));

    health_state.set_ready();
    info!(address = %config.listen_address(), "Showdown listening");

    shutdown_signal().await;
    info!("Shutdown signal received");

    health_state.set_not_ready();
    coordinator.begin_shutdown();
    tracker.close();

    if tokio::time::timeout(config.shutdown_grace, tracker.wait())
        .await
        .is_err()
    {
        warn!(
            remaining = tracker.len(),
            grace_secs = config.shutdown_grace.as_secs(),
            "Grace period elapsed with sessions still open"
        );
    }

    let _ = listener_handle.await;
    let _ = ticker.await;
    let _ = health_handle.await;

    info!("Showdown stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
