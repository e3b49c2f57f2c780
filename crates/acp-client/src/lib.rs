//! # acp-client
//!
//! Session transport and high-level client for ACP base stations.
//!
//! This crate provides:
//! - The duplex session transport: receive buffer, request-serialising
//!   queue, unsolicited monitor-frame dispatch, transparent encryption
//! - The SRP handshake driver that installs session encryption
//! - The `Client` facade: `get_properties`, `set_properties`,
//!   `get_features`, firmware flashing, and reboot

mod auth;
pub mod client;
pub mod session;

pub use client::Client;
pub use session::{Session, SessionHandle, DEFAULT_RECEIVE_TIMEOUT};
