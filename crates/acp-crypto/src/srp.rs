//! SRP-6a client specialised to the ACP deployment.
//!
//! Uses the 1536-bit prime (RFC 5054), generator g=2, SHA-1, and the fixed
//! identity "admin". The client private key is 24 random bytes.

use acp_core::error::AuthError;
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// N size in bytes (1536 bits = 192 bytes).
pub const N_BYTES: usize = 192;

/// Fixed SRP identity for base station administration.
pub const IDENTITY: &[u8] = b"admin";

/// Client private key size in bits (24 bytes).
const PRIVATE_KEY_BITS: u64 = 192;

/// RFC 5054 1536-bit prime N as hex string.
const RFC5054_N_1536: &str = concat!(
    "9DEF3CAFB939277AB1F12A8617A47BBBDBA51DF499AC4C80BEEEA961",
    "4B19CC4D5F4F5F556E27CBDE51C6A94BE4607A291558903BA0D0F843",
    "80B655BB9A22E8DCDF028A7CEC67F0D08134B1C8B97989149B609E0B",
    "E3BAB63D47548381DBC5B1FC764E3F4B53DD9DA1158BFD3E2B9C8CF5",
    "6EDF019539349627DB2FD53D24B7C48665772E437D6C7F8CE442734A",
    "F7CCB7AE837C264AE3A9BEB87F8A2FE9B8B5292E5A021FFF5E91479E",
    "8CE7A28C2442C6F315180F93499A234DCF76E3FED135F9BB"
);

/// SRP-6a parameters (1536-bit, RFC 5054).
pub struct SrpParams {
    /// Prime modulus N.
    pub n: BigUint,
    /// Generator g (always 2).
    pub g: BigUint,
}

impl Default for SrpParams {
    fn default() -> Self {
        let n = BigUint::parse_bytes(RFC5054_N_1536.as_bytes(), 16)
            .expect("Invalid RFC 5054 prime constant");
        let g = BigUint::from(2u32);
        Self { n, g }
    }
}

/// The expected group modulus as big-endian bytes, for validating the
/// modulus echoed by the peer during the handshake.
pub fn modulus_bytes() -> Vec<u8> {
    pad_to_n(&SrpParams::default().n)
}

/// Whether peer-sent generator bytes denote the expected g = 2.
pub fn is_expected_generator(bytes: &[u8]) -> bool {
    let mut significant = bytes.iter().skip_while(|&&b| b == 0);
    significant.next() == Some(&2) && significant.next().is_none()
}

/// Client-side SRP state.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpClient {
    #[zeroize(skip)]
    params: SrpParams,
    password: Vec<u8>,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
}

/// Server challenge containing salt and public key.
pub struct SrpChallenge {
    pub salt: Vec<u8>,
    pub server_public_key: Vec<u8>,
}

/// Result of processing a challenge.
pub struct SrpProof {
    /// M1, sent to the server.
    pub client_proof: Vec<u8>,
    /// K = H(S), the shared session secret.
    pub shared_secret: Vec<u8>,
    /// M2 the server must return.
    pub expected_server_proof: Vec<u8>,
}

impl SrpClient {
    /// Create a new SRP client for the fixed "admin" identity.
    pub fn new(password: &[u8]) -> Self {
        let params = SrpParams::default();

        let a = OsRng.gen_biguint(PRIVATE_KEY_BITS);
        let private_key = a.to_bytes_be();
        let public_key = params.g.modpow(&a, &params.n);

        Self {
            params,
            password: password.to_vec(),
            private_key,
            public_key,
        }
    }

    /// Create an SRP client with a specific private key (for testing).
    #[cfg(test)]
    pub fn with_private_key(password: &[u8], private_key: &[u8]) -> Self {
        let params = SrpParams::default();
        let a = BigUint::from_bytes_be(private_key);
        let public_key = params.g.modpow(&a, &params.n);

        Self {
            params,
            password: password.to_vec(),
            private_key: private_key.to_vec(),
            public_key,
        }
    }

    /// Client public key A, padded to 192 bytes.
    pub fn public_key(&self) -> Vec<u8> {
        pad_to_n(&self.public_key)
    }

    /// Process the server's challenge and generate the proof material.
    pub fn process_challenge(&self, challenge: &SrpChallenge) -> Result<SrpProof, AuthError> {
        let b = BigUint::from_bytes_be(&challenge.server_public_key);

        // B mod N must be nonzero.
        if &b % &self.params.n == BigUint::ZERO {
            return Err(AuthError::InvalidServerPublicKey);
        }

        let a = BigUint::from_bytes_be(&self.private_key);

        // u = H(PAD(A) || PAD(B))
        let u = compute_u(&self.public_key, &b);
        if u == BigUint::ZERO {
            return Err(AuthError::InvalidServerPublicKey);
        }

        // x = H(salt || H(identity || ":" || password))
        let x = compute_x(&challenge.salt, IDENTITY, &self.password);

        // k = H(N || PAD(g))
        let k = compute_k(&self.params);

        // S = (B - k * g^x)^(a + u*x) mod N
        let g_x = self.params.g.modpow(&x, &self.params.n);
        let k_gx = (&k * &g_x) % &self.params.n;
        let base = if b >= k_gx {
            (&b - &k_gx) % &self.params.n
        } else {
            (&b + &self.params.n - &k_gx) % &self.params.n
        };
        let exponent = (&a + &u * &x) % (&self.params.n - BigUint::from(1u32));
        let s = base.modpow(&exponent, &self.params.n);

        // K = H(PAD(S))
        let mut hasher = Sha1::new();
        hasher.update(pad_to_n(&s));
        let shared_secret = hasher.finalize().to_vec();

        let client_proof = compute_m1(
            &self.params,
            IDENTITY,
            &challenge.salt,
            &self.public_key,
            &b,
            &shared_secret,
        );

        // M2 = H(PAD(A) || M1 || K)
        let mut hasher = Sha1::new();
        hasher.update(pad_to_n(&self.public_key));
        hasher.update(&client_proof);
        hasher.update(&shared_secret);
        let expected_server_proof = hasher.finalize().to_vec();

        Ok(SrpProof {
            client_proof,
            shared_secret,
            expected_server_proof,
        })
    }

    /// Verify the server's proof M2 in constant time.
    pub fn verify_server_proof(&self, proof: &[u8], expected: &[u8]) -> bool {
        proof.ct_eq(expected).into()
    }
}

/// Compute M1 = H(H(N) XOR H(g) || H(I) || salt || PAD(A) || PAD(B) || K)
fn compute_m1(
    params: &SrpParams,
    identity: &[u8],
    salt: &[u8],
    a: &BigUint,
    b: &BigUint,
    k: &[u8],
) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(pad_to_n(&params.n));
    let h_n = hasher.finalize();

    // H(g) is taken over the raw generator byte, not PAD(g). This differs
    // from k = H(N || PAD(g)).
    let mut hasher = Sha1::new();
    hasher.update(params.g.to_bytes_be());
    let h_g = hasher.finalize();

    let mut xor_result = [0u8; 20];
    for (slot, (n_byte, g_byte)) in xor_result.iter_mut().zip(h_n.iter().zip(h_g.iter())) {
        *slot = n_byte ^ g_byte;
    }

    let mut hasher = Sha1::new();
    hasher.update(identity);
    let h_i = hasher.finalize();

    let mut hasher = Sha1::new();
    hasher.update(xor_result);
    hasher.update(h_i);
    hasher.update(salt);
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    hasher.update(k);
    hasher.finalize().to_vec()
}

/// Pad a value to N_BYTES with leading zeros.
fn pad_to_n(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= N_BYTES {
        bytes[bytes.len() - N_BYTES..].to_vec()
    } else {
        let mut padded = vec![0u8; N_BYTES - bytes.len()];
        padded.extend_from_slice(&bytes);
        padded
    }
}

/// Compute k = SHA1(N || PAD(g)).
fn compute_k(params: &SrpParams) -> BigUint {
    let mut hasher = Sha1::new();
    hasher.update(pad_to_n(&params.n));
    hasher.update(pad_to_n(&params.g));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Compute u = SHA1(PAD(A) || PAD(B)).
fn compute_u(a: &BigUint, b: &BigUint) -> BigUint {
    let mut hasher = Sha1::new();
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Compute x = SHA1(salt || SHA1(identity || ":" || password)).
fn compute_x(salt: &[u8], identity: &[u8], password: &[u8]) -> BigUint {
    let mut hasher = Sha1::new();
    hasher.update(identity);
    hasher.update(b":");
    hasher.update(password);
    let inner_hash = hasher.finalize();

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(inner_hash);
    BigUint::from_bytes_be(&hasher.finalize())
}
