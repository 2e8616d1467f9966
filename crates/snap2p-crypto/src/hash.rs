//! SHA-256 hashing and HKDF-SHA256 key derivation (RFC 5869).

use hkdf::Hkdf;
use sha2::{Digest, Sha256};

/// SHA-256 hash output (32 bytes).
pub type HashOutput = [u8; 32];

/// Compute the SHA-256 hash of input data.
#[must_use]
pub fn hash(data: &[u8]) -> HashOutput {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Incremental SHA-256 hasher for streaming input.
pub struct StreamHasher {
    hasher: Sha256,
    total_len: usize,
}

impl StreamHasher {
    /// Create a new streaming hasher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            total_len: 0,
        }
    }

    /// Feed more data into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.total_len += data.len();
    }

    /// Total bytes hashed so far.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// Finalize and return the digest.
    #[must_use]
    pub fn finalize(self) -> HashOutput {
        let digest = self.hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }
}

impl Default for StreamHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// HKDF-Extract (RFC 5869 §2.2): derive a pseudorandom key from input key
/// material, using `salt` as the HMAC key.
#[must_use]
pub fn hkdf_extract(salt: &[u8], ikm: &[u8]) -> [u8; 32] {
    let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
    let mut out = [0u8; 32];
    out.copy_from_slice(&prk);
    out
}

/// HKDF-Expand (RFC 5869 §2.3): expand a pseudorandom key into
/// arbitrary-length output keying material.
///
/// # Panics
///
/// Panics if `output` is longer than `255 * 32` bytes, per RFC 5869.
pub fn hkdf_expand(prk: &[u8; 32], info: &[u8], output: &mut [u8]) {
    let hk = Hkdf::<Sha256>::from_prk(prk).expect("32-byte PRK is always valid for HKDF-SHA256");
    hk.expand(info, output)
        .expect("HKDF-SHA256 output length within RFC 5869 bound");
}

/// HKDF-SHA256: combined extract-then-expand.
pub fn hkdf(salt: &[u8], ikm: &[u8], info: &[u8], output: &mut [u8]) {
    let prk = hkdf_extract(salt, ikm);
    hkdf_expand(&prk, info, output);
}
