//! Showdown server configuration.
//!
//! Configuration is loaded from environment variables; every variable is
//! optional. Numeric values must parse and be non-zero.

use crate::admission::{
    AdmissionLimits, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_CONNECTIONS_PER_ORIGIN,
};
use crate::registry::DEFAULT_MAX_PARTICIPANTS;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default session listener host.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default session listener port.
pub const DEFAULT_PORT: u16 = 23234;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "127.0.0.1:8081";

/// Default host key path, relative to the working directory.
pub const DEFAULT_HOST_KEY_PATH: &str = ".ssh/showdown_ed25519";

/// Default authorized-keys path, relative to the working directory.
pub const DEFAULT_AUTHORIZED_KEYS_PATH: &str = ".ssh/showdown_keys";

/// Default hard session lifetime in seconds (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT_SECONDS: u64 = 1800;

/// Default graceful shutdown window in seconds.
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Session listener host (default: "0.0.0.0").
    pub bind_host: String,

    /// Session listener port (default: 23234).
    pub port: u16,

    /// Health and metrics endpoint bind address (default: "127.0.0.1:8081").
    pub health_bind_address: String,

    /// Base64 PKCS#8 Ed25519 host key.
    pub host_key_path: PathBuf,

    /// OpenSSH authorized-keys file listing facilitator keys.
    pub authorized_keys_path: PathBuf,

    pub max_connections: usize,

    pub max_connections_per_ip: usize,

    pub max_participants: usize,

    /// Hard lifetime of one connection.
    pub session_timeout: Duration,

    /// How long shutdown waits for connections to close.
    pub shutdown_grace: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_positive<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };
    let value: T = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{key} must be a positive integer, got '{raw}'")))?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue(format!("{key} must be greater than zero")));
    }
    Ok(value)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_host = vars
            .get("SHOWDOWN_BIND_HOST")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_HOST.to_string());

        let health_bind_address = vars
            .get("SHOWDOWN_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let host_key_path = vars
            .get("SHOWDOWN_HOST_KEY_PATH")
            .map_or_else(|| PathBuf::from(DEFAULT_HOST_KEY_PATH), PathBuf::from);

        let authorized_keys_path = vars
            .get("SHOWDOWN_AUTHORIZED_KEYS_PATH")
            .map_or_else(|| PathBuf::from(DEFAULT_AUTHORIZED_KEYS_PATH), PathBuf::from);

        let port = parse_positive(vars, "SHOWDOWN_PORT", DEFAULT_PORT)?;
        let max_connections =
            parse_positive(vars, "SHOWDOWN_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let max_connections_per_ip = parse_positive(
            vars,
            "SHOWDOWN_MAX_CONNECTIONS_PER_IP",
            DEFAULT_MAX_CONNECTIONS_PER_ORIGIN,
        )?;
        let max_participants =
            parse_positive(vars, "SHOWDOWN_MAX_PARTICIPANTS", DEFAULT_MAX_PARTICIPANTS)?;
        let session_timeout_seconds = parse_positive(
            vars,
            "SHOWDOWN_SESSION_TIMEOUT_SECONDS",
            DEFAULT_SESSION_TIMEOUT_SECONDS,
        )?;
        let shutdown_grace_seconds = parse_positive(
            vars,
            "SHOWDOWN_SHUTDOWN_GRACE_SECONDS",
            DEFAULT_SHUTDOWN_GRACE_SECONDS,
        )?;

        Ok(Config {
            bind_host,
            port,
            health_bind_address,
            host_key_path,
            authorized_keys_path,
            max_connections,
            max_connections_per_ip,
            max_participants,
            session_timeout: Duration::from_secs(session_timeout_seconds),
            shutdown_grace: Duration::from_secs(shutdown_grace_seconds),
        })
    }

    /// Replace the listener port (the `--port` flag).
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `host:port` for the session listener.
    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    #[must_use]
    pub fn admission_limits(&self) -> AdmissionLimits {
        AdmissionLimits {
            max_connections: self.max_connections,
            max_connections_per_origin: self.max_connections_per_ip,
            max_session_duration: self.session_timeout,
        }
    }
}
