//! # snap2p-crypto
//!
//! Cryptographic primitives for the snap2p session protocol.
//!
//! This crate provides:
//! - `Noise_XX` handshake for mutual transport authentication, internally
//!   using `ChaCha20-Poly1305` AEAD (standard 96-bit nonce) as its transport
//!   cipher via `snow`
//! - SHA-256 hashing and HKDF-SHA256 key derivation
//! - Ed25519 signatures for node-key material, with Ed25519→X25519 public
//!   key conversion for deriving the Noise static key from a node key
//! - secp256k1 recoverable-signature verification and Stacks-style
//!   `c32check` principal address derivation, for verifying wallet-signed
//!   attestations
//! - Secure random number generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Key Exchange | X25519 | 128-bit |
//! | AEAD | ChaCha20-Poly1305 | 256-bit key |
//! | Hash | SHA-256 | 128-bit collision |
//! | KDF | HKDF-SHA256 | 128-bit |
//! | Node-key Signatures | Ed25519 | 128-bit |
//! | Wallet Signatures | secp256k1 ECDSA (recoverable) | 128-bit |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod constant_time;
pub mod error;
pub mod hash;
pub mod noise;
pub mod principal;
pub mod random;
pub mod signatures;
pub mod x25519;

pub use error::CryptoError;

/// X25519 public key size
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// X25519 secret key size
pub const X25519_SECRET_KEY_SIZE: usize = 32;

/// SHA-256 output size
pub const SHA256_OUTPUT_SIZE: usize = 32;

/// Ed25519 public key size
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 secret key size
pub const ED25519_SECRET_KEY_SIZE: usize = 32;

/// Ed25519 signature size
pub const ED25519_SIGNATURE_SIZE: usize = 64;

