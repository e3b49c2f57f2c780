//! # acp-crypto
//!
//! Cryptographic primitives for ACP session authentication and encryption.
//!
//! This crate provides:
//! - SRP-6a (1536-bit group, SHA-1) specialised to the base station deployment
//! - PBKDF2-HMAC-SHA1 derivation of the directional session keys
//! - AES-128-CTR stream ciphers layered over the transport after authentication
//!
//! Secret material is zeroized on drop.

pub mod kdf;
pub mod srp;
pub mod stream;

pub use srp::{SrpChallenge, SrpClient, SrpProof};
pub use stream::{EncryptionContext, SessionCipher};
