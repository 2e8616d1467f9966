//! `NodeKeyAttestation` v1 (C4, spec §3/§4.3): the wallet-signed document
//! binding a principal to an ephemeral Noise node key.
//!
//! Building and cryptographic verification are implemented here rather than
//! in `snap2p-crypto`, since both steps need the codec's canonical-map
//! encoder (the signing payload is canonical-map bytes, spec §4.3 "Verify
//! (cryptographic)") together with `snap2p-crypto`'s recovery/hash
//! primitives and the external `Wallet` capability — composing those three
//! things is core business logic, not a cryptographic primitive in its own
//! right.

use crate::codec::canonical::{CanonicalValue, field};
use crate::error::HandshakeError;
use crate::principal::Principal;
use crate::wallet::Wallet;
use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed domain-separator literal attestations must carry (spec §4.3/§6).
pub const ATTESTATION_DOMAIN: &str = "snap2p-nodekey-attestation-v1";

/// Clock-skew tolerance applied to every timestamp check (spec §3/§6).
pub const CLOCK_SKEW_SECS: i64 = 300;

/// Default attestation validity window when building a fresh attestation.
pub const DEFAULT_VALIDITY_SECS: i64 = 24 * 60 * 60;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_secs() as i64
}

/// A wallet-signed principal→node-key binding (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct NodeKeyAttestation {
    /// Always 1 for this version of the format.
    pub version: u32,
    /// The signing wallet's principal.
    pub principal: Principal,
    /// The Ed25519 node public key being attested to.
    pub node_public_key: [u8; 32],
    /// Unix-second creation time.
    pub timestamp: i64,
    /// Unix-second expiry; must be strictly after `timestamp`.
    pub expires_at: i64,
    /// 16-32 random bytes.
    pub nonce: Vec<u8>,
    /// Always [`ATTESTATION_DOMAIN`].
    pub domain: String,
    /// 65-byte `r || s || v` recoverable secp256k1 signature over the
    /// SHA-256 of the canonical signing payload (everything but this
    /// field).
    pub signature: [u8; 65],
}

impl NodeKeyAttestation {
    /// The canonical signing payload: every field except `signature`,
    /// encoded with the keys `v, p, npk, ts, exp, nonce, domain` (spec
    /// §4.3/§6). Verifier and signer agree bit-for-bit because both use
    /// this same function.
    fn signing_payload(
        principal: &Principal,
        node_public_key: &[u8; 32],
        timestamp: i64,
        expires_at: i64,
        nonce: &[u8],
        domain: &str,
    ) -> Vec<u8> {
        CanonicalValue::map([
            ("v", CanonicalValue::UInt(1)),
            ("p", CanonicalValue::Text(principal.as_str().to_string())),
            ("npk", CanonicalValue::Bytes(node_public_key.to_vec())),
            ("ts", CanonicalValue::Int(timestamp)),
            ("exp", CanonicalValue::Int(expires_at)),
            ("nonce", CanonicalValue::Bytes(nonce.to_vec())),
            ("domain", CanonicalValue::Text(domain.to_string())),
        ])
        .to_bytes()
    }

    fn signing_digest(&self) -> [u8; 32] {
        let payload = Self::signing_payload(
            &self.principal,
            &self.node_public_key,
            self.timestamp,
            self.expires_at,
            &self.nonce,
            &self.domain,
        );
        snap2p_crypto::hash::hash(&payload)
    }

    /// Build a fresh attestation for `node_public_key`, valid for
    /// `validity_secs` seconds, and sign it with `wallet`.
    ///
    /// # Panics
    ///
    /// Panics if the OS CSPRNG fails to produce the 32-byte nonce — an
    /// unrecoverable environment failure, consistent with how the rest of
    /// this crate treats CSPRNG failure.
    #[must_use]
    pub fn build(wallet: &dyn Wallet, node_public_key: [u8; 32], validity_secs: i64) -> Self {
        let timestamp = now_secs();
        let expires_at = timestamp + validity_secs;
        let nonce = snap2p_crypto::random::random_32()
            .expect("OS CSPRNG must be available to build an attestation")
            .to_vec();
        let principal = wallet.principal();
        let domain = ATTESTATION_DOMAIN.to_string();

        let payload = Self::signing_payload(
            &principal,
            &node_public_key,
            timestamp,
            expires_at,
            &nonce,
            &domain,
        );
        let digest = snap2p_crypto::hash::hash(&payload);
        let signature = wallet.sign(&digest);

        Self {
            version: 1,
            principal,
            node_public_key,
            timestamp,
            expires_at,
            nonce,
            domain,
            signature,
        }
    }

    /// Serialize the full attestation (signing fields plus `sig`) as
    /// canonical bytes, the wire representation carried opaquely inside an
    /// `AUTH` message's `attestation` field.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        CanonicalValue::map([
            ("v", CanonicalValue::UInt(u64::from(self.version))),
            ("p", CanonicalValue::Text(self.principal.as_str().to_string())),
            ("npk", CanonicalValue::Bytes(self.node_public_key.to_vec())),
            ("ts", CanonicalValue::Int(self.timestamp)),
            ("exp", CanonicalValue::Int(self.expires_at)),
            ("nonce", CanonicalValue::Bytes(self.nonce.clone())),
            ("domain", CanonicalValue::Text(self.domain.clone())),
            ("sig", CanonicalValue::Bytes(self.signature.to_vec())),
        ])
        .to_bytes()
    }

    /// Deserialize an attestation from its wire bytes. This does not
    /// perform any validation; call [`Self::verify_structural`] and
    /// [`Self::verify_cryptographic`] afterward.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::AttestationInvalid`] if the bytes do not
    /// decode into a well-formed attestation map.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, HandshakeError> {
        let bad = |msg: &str| HandshakeError::AttestationInvalid(msg.to_string());
        let (value, _) = CanonicalValue::decode(bytes).map_err(|e| bad(&e.to_string()))?;
        let map = value.as_map().ok_or_else(|| bad("attestation is not a map"))?;

        let version = field::uint(map, "v").map_err(|e| bad(&e.to_string()))? as u32;
        let principal_str = field::text(map, "p").map_err(|e| bad(&e.to_string()))?;
        let principal: Principal = principal_str
            .parse()
            .map_err(|_| bad("attestation principal is malformed"))?;
        let node_public_key: [u8; 32] = field::bytes(map, "npk")
            .map_err(|e| bad(&e.to_string()))?
            .try_into()
            .map_err(|_| bad("node_public_key is not 32 bytes"))?;
        let timestamp = field::int(map, "ts").map_err(|e| bad(&e.to_string()))?;
        let expires_at = field::int(map, "exp").map_err(|e| bad(&e.to_string()))?;
        let nonce = field::bytes(map, "nonce").map_err(|e| bad(&e.to_string()))?;
        let domain = field::text(map, "domain").map_err(|e| bad(&e.to_string()))?;
        let sig_bytes = field::bytes(map, "sig").map_err(|e| bad(&e.to_string()))?;
        let signature: [u8; 65] = sig_bytes
            .try_into()
            .map_err(|_| bad("signature is not 65 bytes"))?;

        Ok(Self {
            version,
            principal,
            node_public_key,
            timestamp,
            expires_at,
            nonce,
            domain,
            signature,
        })
    }

    /// Structural validation (spec §4.3 "Verify (structural)"): version,
    /// domain, nonce length, and timestamp/expiry skew bounds. Does not
    /// touch the signature.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::AttestationInvalid`] or
    /// [`HandshakeError::AttestationExpired`] on the first failing check.
    pub fn verify_structural(&self) -> Result<(), HandshakeError> {
        let bad = |msg: &'static str| HandshakeError::AttestationInvalid(msg.to_string());

        if self.version != 1 {
            return Err(bad("unsupported attestation version"));
        }
        if self.domain != ATTESTATION_DOMAIN {
            return Err(bad("domain separator mismatch"));
        }
        if !(16..=32).contains(&self.nonce.len()) {
            return Err(bad("nonce length out of range"));
        }
        if self.node_public_key.len() != 32 {
            return Err(bad("node_public_key is not 32 bytes"));
        }
        if self.expires_at <= self.timestamp {
            return Err(bad("expires_at must be after timestamp"));
        }

        let now = now_secs();
        if self.timestamp > now + CLOCK_SKEW_SECS {
            return Err(bad("timestamp is too far in the future"));
        }
        if self.expires_at <= now - CLOCK_SKEW_SECS {
            return Err(HandshakeError::AttestationExpired);
        }
        Ok(())
    }

    /// Cryptographic verification (spec §4.3 "Verify (cryptographic)"):
    /// recover the secp256k1 public key from the signature over the
    /// canonical signing digest, derive its Stacks address, and assert it
    /// equals `self.principal`.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::AttestationInvalid`] if recovery fails or
    /// the recovered address does not match the claimed principal.
    pub fn verify_cryptographic(&self) -> Result<(), HandshakeError> {
        if self.signature.iter().all(|&b| b == 0) {
            return Err(HandshakeError::AttestationInvalid(
                "signature is empty".to_string(),
            ));
        }
        let digest = self.signing_digest();
        let recovered = snap2p_crypto::principal::recover_address(
            &digest,
            &self.signature,
            snap2p_crypto::principal::VERSION_MAINNET_SINGLESIG,
        )
        .map_err(|e| HandshakeError::AttestationInvalid(e.to_string()))?;

        if recovered != self.principal.addr() {
            return Err(HandshakeError::AttestationInvalid(
                "recovered address does not match claimed principal".to_string(),
            ));
        }
        Ok(())
    }

    /// Run both structural and cryptographic verification.
    ///
    /// # Errors
    ///
    /// See [`Self::verify_structural`] and [`Self::verify_cryptographic`].
    pub fn verify(&self) -> Result<(), HandshakeError> {
        self.verify_structural()?;
        self.verify_cryptographic()
    }
}
