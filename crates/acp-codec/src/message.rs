//! ACP message framing: a fixed 128-byte header plus an optional body.
//!
//! The header is checksummed with Adler-32 (its own checksum field zeroed);
//! the body checksum covers the body bytes, or is 1 when there is no body.
//! A body size of -1 marks an open-ended stream frame.

use crate::adler::adler32;
use crate::keystream::{header_key, HEADER_KEY_SIZE};
use acp_core::error::{FramingError, Result};

/// Size of the framed header.
pub const HEADER_SIZE: usize = 128;

/// Body size marker for open-ended stream frames.
pub const BODY_STREAM: i32 = -1;

const MAGIC: [u8; 4] = *b"acpp";
const VERSION_WIRE: u32 = 0x0003_0001;
const VERSION_LEGACY: u32 = 0x0000_0001;
const EMPTY_BODY_CHECKSUM: u32 = 1;

const OFFSET_MAGIC: usize = 0;
const OFFSET_VERSION: usize = 4;
const OFFSET_HEADER_CHECKSUM: usize = 8;
const OFFSET_BODY_CHECKSUM: usize = 12;
const OFFSET_BODY_SIZE: usize = 16;
const OFFSET_FLAGS: usize = 20;
const OFFSET_UNUSED: usize = 24;
const OFFSET_COMMAND: usize = 28;
const OFFSET_ERROR_CODE: usize = 32;
const OFFSET_KEY: usize = 48;

/// Commands understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// Liveness check.
    Echo = 0x01,
    /// Write the primary firmware image.
    FlashPrimary = 0x03,
    /// Accepted on the wire; never issued by this client.
    FlashRestore = 0x04,
    /// Write the secondary firmware image.
    FlashSecondary = 0x05,
    /// Write the bootloader.
    FlashBootloader = 0x06,
    /// Read properties.
    GetProp = 0x14,
    /// Write properties.
    SetProp = 0x15,
    /// Trigger an action.
    Perform = 0x16,
    /// Accepted on the wire; never issued by this client.
    MonitorPoll = 0x17,
    /// Subscribe to unsolicited monitor data.
    Monitor = 0x18,
    /// Structured RPC.
    Rpc = 0x19,
    /// SRP handshake.
    Auth = 0x1a,
    /// Enumerate features.
    Feat = 0x1b,
}

impl Command {
    pub fn from_u32(raw: u32) -> Option<Command> {
        Some(match raw {
            0x01 => Command::Echo,
            0x03 => Command::FlashPrimary,
            0x04 => Command::FlashRestore,
            0x05 => Command::FlashSecondary,
            0x06 => Command::FlashBootloader,
            0x14 => Command::GetProp,
            0x15 => Command::SetProp,
            0x16 => Command::Perform,
            0x17 => Command::MonitorPoll,
            0x18 => Command::Monitor,
            0x19 => Command::Rpc,
            0x1a => Command::Auth,
            0x1b => Command::Feat,
            _ => return None,
        })
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// One request or response frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub version: u32,
    pub flags: u32,
    pub unused: u32,
    pub command: Command,
    pub error_code: i32,
    /// Obfuscated password, 32 bytes.
    pub key: [u8; HEADER_KEY_SIZE],
    pub body_size: i32,
    pub body_checksum: u32,
    pub body: Option<Vec<u8>>,
}

impl Message {
    /// Build an outbound frame for `command`.
    pub fn new(
        command: Command,
        flags: u32,
        error_code: i32,
        password: &str,
        body: Option<Vec<u8>>,
    ) -> Self {
        let (body_size, body_checksum) = match &body {
            Some(bytes) => (bytes.len() as i32, adler32(bytes)),
            None => (0, EMPTY_BODY_CHECKSUM),
        };
        Self {
            version: VERSION_WIRE,
            flags,
            unused: 0,
            command,
            error_code,
            key: header_key(password),
            body_size,
            body_checksum,
            body,
        }
    }

    pub fn echo(password: &str, body: Option<Vec<u8>>) -> Self {
        Self::new(Command::Echo, 0, 0, password, body)
    }

    pub fn get_prop(password: &str, body: Vec<u8>) -> Self {
        Self::new(Command::GetProp, 4, 0, password, Some(body))
    }

    pub fn set_prop(password: &str, body: Vec<u8>) -> Self {
        Self::new(Command::SetProp, 0, 0, password, Some(body))
    }

    pub fn perform(password: &str, body: Vec<u8>) -> Self {
        Self::new(Command::Perform, 0, 0, password, Some(body))
    }

    pub fn monitor(password: &str, body: Vec<u8>) -> Self {
        Self::new(Command::Monitor, 0, 0, password, Some(body))
    }

    pub fn rpc(password: &str, body: Vec<u8>) -> Self {
        Self::new(Command::Rpc, 0, 0, password, Some(body))
    }

    pub fn auth(password: &str, body: Vec<u8>) -> Self {
        Self::new(Command::Auth, 0, 0, password, Some(body))
    }

    /// Feature enumeration always derives its key from the empty password.
    pub fn feat() -> Self {
        Self::new(Command::Feat, 0, 0, "", None)
    }

    pub fn flash_primary(password: &str, image: Vec<u8>) -> Self {
        Self::new(Command::FlashPrimary, 0, 0, password, Some(image))
    }

    pub fn flash_secondary(password: &str, image: Vec<u8>) -> Self {
        Self::new(Command::FlashSecondary, 0, 0, password, Some(image))
    }

    pub fn flash_bootloader(password: &str, image: Vec<u8>) -> Self {
        Self::new(Command::FlashBootloader, 0, 0, password, Some(image))
    }

    /// Serialize header and body to wire bytes.
    pub fn compose(&self) -> Vec<u8> {
        let mut out = self.pack_header().to_vec();
        if let Some(body) = &self.body {
            out.extend_from_slice(body);
        }
        out
    }

    /// Serialize the 128-byte header, computing its checksum.
    pub fn pack_header(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[OFFSET_MAGIC..OFFSET_MAGIC + 4].copy_from_slice(&MAGIC);
        put_u32(&mut header, OFFSET_VERSION, self.version);
        put_u32(&mut header, OFFSET_BODY_CHECKSUM, self.body_checksum);
        put_u32(&mut header, OFFSET_BODY_SIZE, self.body_size as u32);
        put_u32(&mut header, OFFSET_FLAGS, self.flags);
        put_u32(&mut header, OFFSET_UNUSED, self.unused);
        put_u32(&mut header, OFFSET_COMMAND, self.command.as_u32());
        put_u32(&mut header, OFFSET_ERROR_CODE, self.error_code as u32);
        header[OFFSET_KEY..OFFSET_KEY + HEADER_KEY_SIZE].copy_from_slice(&self.key);
        let checksum = adler32(&header);
        put_u32(&mut header, OFFSET_HEADER_CHECKSUM, checksum);
        header
    }

    /// Parse a frame, requiring the input to contain exactly the header and
    /// any declared body.
    pub fn parse(data: &[u8]) -> Result<Message> {
        let (message, remaining) = Self::parse_inner(data, false)?;
        debug_assert!(remaining.is_empty());
        Ok(message)
    }

    /// Parse a frame and return the tail of the buffer beyond it.
    pub fn parse_with_remaining(data: &[u8]) -> Result<(Message, &[u8])> {
        Self::parse_inner(data, true)
    }

    fn parse_inner(data: &[u8], return_remaining: bool) -> Result<(Message, &[u8])> {
        if data.len() < HEADER_SIZE {
            return Err(FramingError::Truncated { actual: data.len() }.into());
        }
        let header = &data[..HEADER_SIZE];

        let magic = [header[0], header[1], header[2], header[3]];
        if magic != MAGIC {
            return Err(FramingError::BadMagic(magic).into());
        }

        let version = get_u32(header, OFFSET_VERSION);
        if version != VERSION_WIRE && version != VERSION_LEGACY {
            return Err(FramingError::UnknownVersion(version).into());
        }

        let expected = get_u32(header, OFFSET_HEADER_CHECKSUM);
        let mut zeroed = [0u8; HEADER_SIZE];
        zeroed.copy_from_slice(header);
        put_u32(&mut zeroed, OFFSET_HEADER_CHECKSUM, 0);
        let computed = adler32(&zeroed);
        if computed != expected {
            return Err(FramingError::HeaderChecksum { expected, computed }.into());
        }

        let body_checksum = get_u32(header, OFFSET_BODY_CHECKSUM);
        let body_size = get_u32(header, OFFSET_BODY_SIZE) as i32;
        let flags = get_u32(header, OFFSET_FLAGS);
        let unused = get_u32(header, OFFSET_UNUSED);
        let raw_command = get_u32(header, OFFSET_COMMAND);
        let command = Command::from_u32(raw_command)
            .ok_or(FramingError::UnknownCommand(raw_command))?;
        let error_code = get_u32(header, OFFSET_ERROR_CODE) as i32;
        let mut key = [0u8; HEADER_KEY_SIZE];
        key.copy_from_slice(&header[OFFSET_KEY..OFFSET_KEY + HEADER_KEY_SIZE]);

        let tail = &data[HEADER_SIZE..];
        let (body, remaining) = if tail.is_empty() {
            (None, tail)
        } else if body_size == BODY_STREAM {
            return Err(FramingError::StreamWithBody.into());
        } else if body_size < 0 {
            return Err(FramingError::BodySize {
                declared: body_size,
                actual: tail.len(),
            }
            .into());
        } else {
            let declared = body_size as usize;
            let mismatch = if return_remaining {
                tail.len() < declared
            } else {
                tail.len() != declared
            };
            if mismatch {
                return Err(FramingError::BodySize {
                    declared: body_size,
                    actual: tail.len(),
                }
                .into());
            }
            let (body, remaining) = tail.split_at(declared);
            let computed = adler32(body);
            if computed != body_checksum {
                return Err(FramingError::BodyChecksum {
                    expected: body_checksum,
                    computed,
                }
                .into());
            }
            (Some(body.to_vec()), remaining)
        };

        Ok((
            Message {
                version,
                flags,
                unused,
                command,
                error_code,
                key,
                body_size,
                body_checksum,
                body,
            },
            remaining,
        ))
    }
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}
