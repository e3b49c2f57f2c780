//! Error types for the ACP client.

use thiserror::Error;

/// Primary error type for all ACP operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Plist error: {0}")]
    Plist(#[from] PlistError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Property error: {0}")]
    Property(#[from] PropertyError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Encryption state error: {0}")]
    EncryptionState(#[from] EncryptionStateError),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(TransportError::Io(err))
    }
}

/// Errors from the 128-byte message framing layer.
#[derive(Error, Debug)]
pub enum FramingError {
    #[error("message shorter than header: {actual} bytes")]
    Truncated { actual: usize },

    #[error("bad magic {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unknown protocol version {0:#010x}")]
    UnknownVersion(u32),

    #[error("header checksum mismatch: header says {expected:#010x}, computed {computed:#010x}")]
    HeaderChecksum { expected: u32, computed: u32 },

    #[error("body checksum mismatch: header says {expected:#010x}, computed {computed:#010x}")]
    BodyChecksum { expected: u32, computed: u32 },

    #[error("unknown command {0:#04x}")]
    UnknownCommand(u32),

    #[error("body size mismatch: header declares {declared}, got {actual} bytes")]
    BodySize { declared: i32, actual: usize },

    #[error("stream header (body size -1) carries an attached body")]
    StreamWithBody,

    #[error("property element truncated: expected {expected} bytes, got {actual}")]
    ElementTruncated { expected: usize, actual: usize },
}

/// Errors from the CFLBinaryPList codec.
#[derive(Error, Debug)]
pub enum PlistError {
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    #[error("unknown object tag {tag:#04x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("invalid size prefix {0:#04x}")]
    InvalidSizePrefix(u8),

    #[error("declared size {0} exceeds remaining input")]
    SizeOverrun(usize),

    #[error("non-ASCII byte in ASCII string payload")]
    InvalidAscii,

    #[error("unpaired surrogate in UTF-16 string payload")]
    InvalidUtf16,

    #[error("dictionary key is not a string")]
    NonStringKey,

    #[error("collection not terminated")]
    MissingTerminator,

    #[error("{0} bytes of trailing data after root object")]
    TrailingData(usize),
}

/// Non-zero error code returned by the device for a whole command.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("device returned error code {code}")]
pub struct ProtocolError {
    pub code: i32,
}

/// Error code returned by the device for a single property element.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("property {tag}: device returned error code {code}")]
pub struct PropertyError {
    pub tag: String,
    pub code: i32,
}

/// Catalogue rejection of a property value at construction time.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("property name must be exactly 4 ASCII bytes: {0:?}")]
    BadTag(String),

    #[error("unknown property tag {0:?}")]
    UnknownTag(String),

    #[error("property {tag} does not accept {given} values")]
    WrongType { tag: String, given: &'static str },

    #[error("property {tag}: {reason}")]
    InvalidValue { tag: String, reason: String },

    #[error("property {tag}: value rejected by validator")]
    Rejected { tag: String },
}

/// Errors during the SRP handshake.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("unexpected handshake state {got} (expected {expected})")]
    UnexpectedState { expected: u64, got: u64 },

    #[error("missing {0:?} field in handshake response")]
    MissingField(&'static str),

    #[error("handshake field {0:?} has unexpected shape")]
    MalformedField(&'static str),

    #[error("peer modulus does not match the expected 1536-bit group")]
    WrongModulus,

    #[error("peer generator is not 2")]
    WrongGenerator,

    #[error("invalid server public key")]
    InvalidServerPublicKey,

    #[error("server proof M2 mismatch (wrong password?)")]
    ProofMismatch,
}

/// Errors from the session transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("receive timed out")]
    Timeout,

    #[error("connection lost")]
    ConnectionLost,

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Misuse of the session encryption state machine.
#[derive(Error, Debug)]
pub enum EncryptionStateError {
    #[error("session encryption is already enabled")]
    AlreadyEnabled,
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
