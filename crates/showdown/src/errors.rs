//! Showdown error types.
//!
//! Internal details are logged server-side; connections only ever see
//! [`ShowdownError::client_message`].

use crate::admission::{AdmissionError, SessionExpired};
use crate::auth::KeyError;
use crate::config::ConfigError;
use crate::identity::NameError;
use crate::registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShowdownError {
    /// Connection turned away by admission control.
    #[error("Admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    /// Connection outlived the session lifetime.
    #[error(transparent)]
    SessionExpired(#[from] SessionExpired),

    /// Submitted name failed validation.
    #[error("Invalid name: {0}")]
    InvalidName(#[from] NameError),

    /// Registration raced or hit the participant cap.
    #[error("Registration failed: {0}")]
    Registration(#[from] RegistryError),

    /// A facilitator is already connected.
    #[error("Facilitator slot already taken")]
    FacilitatorActive,

    /// Host key or authorized-keys failure.
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Client broke the line protocol (e.g. an overlong line).
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShowdownError {
    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ShowdownError::Admission(e) => e.to_string(),
            ShowdownError::SessionExpired(_) => "Session timeout".to_string(),
            ShowdownError::InvalidName(e) => e.to_string(),
            ShowdownError::Registration(e) => e.to_string(),
            ShowdownError::FacilitatorActive => {
                "A facilitator is already connected".to_string()
            }
            ShowdownError::Protocol(_) => "Protocol error".to_string(),
            ShowdownError::Key(_)
            | ShowdownError::Config(_)
            | ShowdownError::Bind { .. }
            | ShowdownError::Io(_) => "An internal error occurred".to_string(),
        }
    }

    /// Whether the connection stays open so the client can retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShowdownError::InvalidName(_) | ShowdownError::Registration(_)
        )
    }

    /// Whether this error must stop the process (startup failures).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShowdownError::Key(_) | ShowdownError::Config(_) | ShowdownError::Bind { .. }
        )
    }
}
