//! # acp-codec
//!
//! Wire codecs for the ACP (Apple Control Protocol) client.
//!
//! This crate provides:
//! - Adler-32 checksums over message headers and bodies
//! - The obfuscation keystream and header-key derivation
//! - The CFLBinaryPList serializer used for structured payloads
//! - The 128-byte framed message codec
//! - The 12-byte property element codec and value coercions

pub mod adler;
pub mod cflbinary;
pub mod keystream;
pub mod message;
pub mod property;

pub use adler::adler32;
pub use cflbinary::Value;
pub use keystream::{header_key, Keystream, HEADER_KEY_SIZE};
pub use message::{Command, Message, HEADER_SIZE};
pub use property::{ElementHeader, Property, PropertyValue, ELEMENT_HEADER_SIZE};
