//! AES-128-CTR session ciphers layered over the transport after SRP.
//!
//! Two independent keystreams cover the two directions; the counters advance
//! monotonically for the lifetime of the session and are never reset.

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes128;
use zeroize::Zeroize;

use crate::kdf;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// One direction of the session keystream.
pub struct SessionCipher {
    inner: Aes128Ctr,
}

impl SessionCipher {
    fn new(key: [u8; kdf::SESSION_KEY_SIZE], iv: [u8; 16]) -> Self {
        Self {
            inner: Aes128Ctr::new(&key.into(), &iv.into()),
        }
    }

    /// XOR the next keystream bytes over `data` in place. Encryption and
    /// decryption are the same operation; alignment with the peer depends on
    /// every byte passing through exactly once.
    pub fn apply(&mut self, data: &mut [u8]) {
        self.inner.apply_keystream(data);
    }
}

/// The two directional ciphers derived from a completed SRP exchange.
pub struct EncryptionContext {
    to_device: SessionCipher,
    from_device: SessionCipher,
}

impl EncryptionContext {
    /// Derive both directions from the SRP shared secret and the two nonces
    /// exchanged during the handshake.
    pub fn new(shared_secret: &[u8], client_iv: [u8; 16], server_iv: [u8; 16]) -> Self {
        let mut client_key = kdf::client_key(shared_secret);
        let mut server_key = kdf::server_key(shared_secret);
        let context = Self {
            to_device: SessionCipher::new(client_key, client_iv),
            from_device: SessionCipher::new(server_key, server_iv),
        };
        client_key.zeroize();
        server_key.zeroize();
        context
    }

    /// Split into the outbound and inbound halves.
    pub fn split(self) -> (SessionCipher, SessionCipher) {
        (self.to_device, self.from_device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_pair() -> (EncryptionContext, EncryptionContext) {
        let secret = [0x5au8; 20];
        let client_iv = [0x11u8; 16];
        let server_iv = [0x22u8; 16];
        (
            EncryptionContext::new(&secret, client_iv, server_iv),
            EncryptionContext::new(&secret, client_iv, server_iv),
        )
    }

    #[test]
    fn mirrored_contexts_roundtrip() {
        let (ours, theirs) = context_pair();
        let (mut tx, _) = ours.split();
        let (mut peer_rx, _) = theirs.split();

        let mut data = b"getprop syNm".to_vec();
        tx.apply(&mut data);
        assert_ne!(data, b"getprop syNm");
        peer_rx.apply(&mut data);
        assert_eq!(data, b"getprop syNm");
    }

    #[test]
    fn keystream_survives_chunked_application() {
        let (ours, theirs) = context_pair();
        let (mut whole, _) = ours.split();
        let (mut chunked, _) = theirs.split();

        let mut a = vec![0u8; 64];
        whole.apply(&mut a);

        let mut b = vec![0u8; 64];
        for chunk in b.chunks_mut(7) {
            chunked.apply(chunk);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn directions_are_independent() {
        let (ours, _) = context_pair();
        let (mut tx, mut rx) = ours.split();

        let mut a = vec![0u8; 32];
        let mut b = vec![0u8; 32];
        tx.apply(&mut a);
        rx.apply(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn counter_never_resets() {
        let (ours, theirs) = context_pair();
        let (mut tx, _) = ours.split();
        let (mut reference, _) = theirs.split();

        let mut first = vec![0u8; 16];
        let mut second = vec![0u8; 16];
        tx.apply(&mut first);
        tx.apply(&mut second);
        assert_ne!(first, second);

        let mut combined = vec![0u8; 32];
        reference.apply(&mut combined);
        assert_eq!(&combined[..16], &first[..]);
        assert_eq!(&combined[16..], &second[..]);
    }
}
