//! # acp-core
//!
//! Shared foundations for the ACP (Apple Control Protocol) client crates.
//!
//! This crate provides:
//! - The error taxonomy used across the codec, crypto, and transport layers
//! - The static property catalogue mapping 4-character tags to their
//!   semantic types and validators

pub mod catalogue;
pub mod error;

pub use catalogue::{Entry, Kind, Validator};
pub use error::{
    AuthError, EncryptionStateError, Error, FramingError, PlistError, PropertyError,
    ProtocolError, Result, TransportError, ValidationError,
};
