//! # Showdown Test Utilities
//!
//! Shared test utilities for the Showdown session server.
//!
//! This crate provides:
//! - Deterministic key fixtures (fixed Ed25519 keys for reproducible tests)
//! - A mock connection handle that counts terminations
//! - Server test harness (`TestShowdownServer` for end-to-end tests)
//! - A line client that speaks the TCP protocol
//!
//! ## Usage
//!
//! ```rust,ignore
//! use showdown_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let facilitator = TestKeyPair::from_seed(1);
//!     let server = TestShowdownServer::builder()
//!         .authorize(&facilitator)
//!         .spawn()
//!         .await?;
//!
//!     let mut client = LineClient::connect(server.addr()).await?;
//!     let greeting = client.expect_greeting().await?;
//!     client.send(&facilitator.auth_line(&greeting)).await?;
//!     client.read_until("Connected Players").await?;
//! }
//! ```

pub mod client;
pub mod crypto_fixtures;
pub mod mock_session;
pub mod server_harness;

// Re-export commonly used items
pub use client::*;
pub use crypto_fixtures::*;
pub use mock_session::*;
pub use server_harness::*;
