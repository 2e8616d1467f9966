//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid nonce length
    #[error("invalid nonce length")]
    InvalidNonceLength,

    /// Noise handshake error
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// An Ed25519 public key was malformed or not a valid curve point
    #[error("invalid public key")]
    InvalidPublicKey,

    /// An Ed25519 or secp256k1 signature was malformed or failed verification
    #[error("invalid signature")]
    InvalidSignature,

    /// secp256k1 public key recovery from a signature failed
    #[error("signature recovery failed")]
    RecoveryFailed,

    /// A Stacks-style principal address string was malformed
    #[error("invalid principal address: {0}")]
    InvalidPrincipal(String),

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Nonce overflow (counter exhausted)
    #[error("nonce counter exhausted, rekey required")]
    NonceOverflow,
}
