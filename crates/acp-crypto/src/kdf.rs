//! Directional session key derivation: PBKDF2-HMAC-SHA1 over the SRP shared
//! secret, with fixed per-direction salts and iteration counts.

use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;

/// AES-128 key size.
pub const SESSION_KEY_SIZE: usize = 16;

const CLIENT_KEY_SALT: [u8; 16] = [
    0xf0, 0x72, 0xfa, 0x3f, 0x66, 0xb4, 0x10, 0xa1, 0x35, 0xfa, 0xe8, 0xe6, 0xd1, 0xd4, 0x3d, 0x5f,
];
const SERVER_KEY_SALT: [u8; 16] = [
    0xbd, 0x06, 0x82, 0xc9, 0xfe, 0x79, 0x32, 0x5b, 0xc7, 0x36, 0x55, 0xf4, 0x17, 0x4b, 0x99, 0x6c,
];
const CLIENT_KEY_ROUNDS: u32 = 5;
const SERVER_KEY_ROUNDS: u32 = 7;

/// Derive the client-to-server AES key.
pub fn client_key(shared_secret: &[u8]) -> [u8; SESSION_KEY_SIZE] {
    let mut key = [0u8; SESSION_KEY_SIZE];
    pbkdf2_hmac::<Sha1>(shared_secret, &CLIENT_KEY_SALT, CLIENT_KEY_ROUNDS, &mut key);
    key
}

/// Derive the server-to-client AES key.
pub fn server_key(shared_secret: &[u8]) -> [u8; SESSION_KEY_SIZE] {
    let mut key = [0u8; SESSION_KEY_SIZE];
    pbkdf2_hmac::<Sha1>(shared_secret, &SERVER_KEY_SALT, SERVER_KEY_ROUNDS, &mut key);
    key
}
