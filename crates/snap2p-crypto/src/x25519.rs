//! X25519 Diffie-Hellman key exchange (RFC 7748).
//!
//! Provides curve25519-based key exchange with:
//! - Low-order point rejection
//! - Automatic key clamping (RFC 7748)
//! - Zeroization of sensitive data

use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// X25519 private key (32 bytes).
#[derive(Clone, ZeroizeOnDrop, Zeroize)]
pub struct PrivateKey(x25519_dalek::StaticSecret);

/// X25519 public key (32 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

/// X25519 shared secret (32 bytes).
#[derive(ZeroizeOnDrop, Zeroize)]
pub struct SharedSecret(x25519_dalek::SharedSecret);

impl PrivateKey {
    /// Generate a new random private key with RFC 7748 clamping.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(x25519_dalek::StaticSecret::random_from_rng(rng))
    }

    /// Derive the public key from this private key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Perform Diffie-Hellman key exchange.
    ///
    /// Returns `None` if the peer's public key is a low-order point (security check).
    #[must_use]
    pub fn exchange(&self, peer_public: &PublicKey) -> Option<SharedSecret> {
        let shared = self.0.diffie_hellman(&peer_public.0);

        // Check for low-order points
        if shared.as_bytes() == &[0u8; 32] {
            return None;
        }

        Some(SharedSecret(shared))
    }

    /// Export as bytes (for serialization).
    ///
    /// # Security
    ///
    /// The returned bytes contain the raw private key. Handle with care.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Import from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }
}

impl PublicKey {
    /// Export public key as bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        *self.0.as_bytes()
    }

    /// Import public key from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    /// Get bytes as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl SharedSecret {
    /// Get shared secret as bytes.
    ///
    /// # Security
    ///
    /// The shared secret should be used with a KDF (HKDF-SHA256, see
    /// `hash::hkdf`) before use as an encryption key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

/// Convert an Ed25519 public key to its X25519 (Montgomery) form.
///
/// This is the standard birational map between the twisted Edwards curve
/// and its Montgomery form: decompress the Edwards point and project it
/// onto the Montgomery u-coordinate. The node key attestation binds a
/// single Ed25519 identity key; the Noise static key used for the XX
/// handshake is this key's X25519 image, not an independently generated
/// keypair.
///
/// # Errors
///
/// Returns [`crate::CryptoError::InvalidPublicKey`] if `bytes` is not a
/// valid compressed Edwards point.
pub fn ed25519_public_to_x25519(
    bytes: &[u8; 32],
) -> Result<PublicKey, crate::CryptoError> {
    let compressed = curve25519_dalek::edwards::CompressedEdwardsY(*bytes);
    let edwards = compressed
        .decompress()
        .ok_or(crate::CryptoError::InvalidPublicKey)?;
    let montgomery = edwards.to_montgomery();
    Ok(PublicKey(x25519_dalek::PublicKey::from(montgomery.0)))
}

/// Convert an Ed25519 signing seed to its X25519 private scalar.
///
/// Mirrors the conversion `ed25519_public_to_x25519` performs on the public
/// side: the Ed25519 expanded secret scalar (the low 32 bytes of
/// `SHA-512(seed)`, clamped per RFC 7748) is numerically the same scalar
/// used for Montgomery-form X25519 Diffie-Hellman.
#[must_use]
pub fn ed25519_seed_to_x25519_private(seed: &[u8; 32]) -> PrivateKey {
    let mut hasher = Sha512::new();
    hasher.update(seed);
    let digest = hasher.finalize();

    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&digest[..32]);
    scalar[0] &= 248;
    scalar[31] &= 127;
    scalar[31] |= 64;

    PrivateKey(x25519_dalek::StaticSecret::from(scalar))
}
