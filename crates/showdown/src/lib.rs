//! Showdown session server library.
//!
//! A single-process planning poker server: one facilitator drives anonymous
//! voting rounds among up to a configured number of participants, each on
//! its own connection.
//!
//! # Architecture
//!
//! ```text
//! TcpTransport (accept loop)
//! └── connection task (one per connection, owns an AdmissionSlot)
//!     └── run_session
//!         ├── name entry -> ParticipantLease
//!         └── FacilitatorLease
//! SessionCoordinator (one per process, passed by Arc)
//! ├── Registry (participants, facilitator slot, reveal flag, countdown)
//! ├── TimerScheduler (single pending countdown)
//! ├── AdmissionController (global and per-origin limits, session lifetime)
//! └── Notice broadcast (one-second ticks, countdown expiry)
//! ```
//!
//! All state is in memory and lost on restart.
//!
//! # Modules
//!
//! - [`admission`] - Connection limits and session lifetime
//! - [`auth`] - Host key, challenges and facilitator credentials
//! - [`coordinator`] - The shared service and role leases
//! - [`identity`] - Participant name validation
//! - [`registry`] - Shared session state
//! - [`round`] - Deck, countdown presets and command parsing
//! - [`session`] - Per-connection driver
//! - [`stats`] - Vote statistics
//! - [`timer`] - Countdown auto-reveal and refresh ticks
//! - [`transport`] - Connection handle seam and the TCP transport
//! - [`view`] - Plain-text views

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod admission;
pub mod auth;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod identity;
pub mod observability;
pub mod registry;
pub mod round;
pub mod session;
pub mod stats;
pub mod timer;
pub mod transport;
pub mod view;
