//! Adler-32 checksum (RFC 1950) over message headers and bodies.

use adler2::Adler32;

/// Compute the Adler-32 checksum of a byte slice.
///
/// The empty slice checksums to 1, which the message codec reuses as the
/// body checksum of bodyless frames.
pub fn adler32(data: &[u8]) -> u32 {
    let mut hasher = Adler32::new();
    hasher.write_slice(data);
    hasher.checksum()
}
