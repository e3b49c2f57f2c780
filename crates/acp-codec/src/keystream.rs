//! Obfuscation keystream for message header keys and plist headers.
//!
//! The stream is generated from a fixed 256-byte permutation seeded by a
//! constant key schedule; two indices walk the table and each output byte
//! swaps two table entries. Every message header key and every composed
//! CFLBinaryPList blob consumes a fresh stream starting from byte 0.

/// Length of the obfuscated key field in the message header.
pub const HEADER_KEY_SIZE: usize = 32;

/// Fixed schedule used to build the initial table permutation.
const SEED: [u8; 32] = [
    0x8f, 0x3a, 0xd1, 0x6c, 0x25, 0xb9, 0x70, 0xe4, 0x5b, 0x0e, 0x97, 0xc2, 0x48, 0xfd, 0x13, 0xa6,
    0x31, 0xde, 0x8a, 0x07, 0xbc, 0x65, 0xf0, 0x29, 0x52, 0x9d, 0x1e, 0xc7, 0x74, 0x0b, 0xe8, 0x3f,
];

/// Deterministic byte generator.
pub struct Keystream {
    table: [u8; 256],
    i: u8,
    j: u8,
}

impl Keystream {
    /// Start a fresh stream at byte 0.
    pub fn new() -> Self {
        let mut table = [0u8; 256];
        for (n, slot) in table.iter_mut().enumerate() {
            *slot = n as u8;
        }
        let mut j: u8 = 0;
        for n in 0..256 {
            j = j
                .wrapping_add(table[n])
                .wrapping_add(SEED[n % SEED.len()]);
            table.swap(n, j as usize);
        }
        Self { table, i: 0, j: 0 }
    }

    /// Yield the next keystream byte.
    pub fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.table[self.i as usize]);
        self.table.swap(self.i as usize, self.j as usize);
        let t = self.table[self.i as usize].wrapping_add(self.table[self.j as usize]);
        self.table[t as usize]
    }

    /// Yield the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Vec<u8> {
        (0..n).map(|_| self.next_byte()).collect()
    }
}

impl Default for Keystream {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive the 32-byte obfuscated header key for a password.
///
/// The plaintext password is XOR-ed over the first 32 keystream bytes;
/// passwords shorter than 32 bytes are NUL-padded (XOR with zero leaves the
/// keystream byte unchanged) and longer passwords are silently truncated.
pub fn header_key(password: &str) -> [u8; HEADER_KEY_SIZE] {
    let mut stream = Keystream::new();
    let mut key = [0u8; HEADER_KEY_SIZE];
    for slot in key.iter_mut() {
        *slot = stream.next_byte();
    }
    for (slot, byte) in key.iter_mut().zip(password.bytes()) {
        *slot ^= byte;
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_a_permutation() {
        let stream = Keystream::new();
        let mut seen = [false; 256];
        for &b in stream.table.iter() {
            seen[b as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn stream_is_deterministic() {
        let a = Keystream::new().take(256);
        let b = Keystream::new().take(256);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_password_key_is_raw_keystream() {
        let key = header_key("");
        assert_eq!(key.to_vec(), Keystream::new().take(HEADER_KEY_SIZE));
    }

    #[test]
    fn password_is_xored_over_stream() {
        let raw = header_key("");
        let key = header_key("admin");
        for (n, &b) in b"admin".iter().enumerate() {
            assert_eq!(key[n], raw[n] ^ b);
        }
        assert_eq!(&key[5..], &raw[5..]);
    }

    #[test]
    fn long_password_is_truncated() {
        let long: String = std::iter::repeat('x').take(48).collect();
        let trimmed: String = std::iter::repeat('x').take(32).collect();
        assert_eq!(header_key(&long), header_key(&trimmed));
    }
}
