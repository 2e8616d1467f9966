//! The `Wallet` capability interface (spec §1/§9): the external
//! collaborator that owns a principal's secp256k1 key material. Key
//! storage, KDFs, seed phrases and password UX all live outside the core;
//! the core only ever calls `principal()` and `sign(bytes)`.

use crate::principal::Principal;

/// A wallet capability: identity plus the ability to produce a recoverable
/// secp256k1 signature over an arbitrary digest. Implementations of this
/// trait are out of scope for the protocol engine (spec §1 "Out of
/// scope: Wallet").
pub trait Wallet: Send + Sync {
    /// This wallet's principal address.
    fn principal(&self) -> Principal;

    /// Sign `message_hash` (a 32-byte digest), returning a 65-byte
    /// `r || s || v` recoverable secp256k1 signature.
    fn sign(&self, message_hash: &[u8; 32]) -> [u8; 65];
}

/// An in-memory [`Wallet`] suitable for tests and ephemeral nodes:
/// generates a fresh secp256k1 keypair and signs locally. Production
/// wallets (hardware, remote signer, encrypted keystore) implement
/// [`Wallet`] themselves; this type exists purely so the core crate and
/// its tests do not need an external wallet crate to exercise the
/// handshake end-to-end.
pub struct EphemeralWallet {
    signing_key: k256::ecdsa::SigningKey,
    principal: Principal,
}

impl EphemeralWallet {
    /// Generate a new wallet with a random secp256k1 keypair.
    #[must_use]
    pub fn generate() -> Self {
        let signing_key = k256::ecdsa::SigningKey::random(&mut rand_core::OsRng);
        let principal = Self::derive_principal(&signing_key);
        Self { signing_key, principal }
    }

    fn derive_principal(signing_key: &k256::ecdsa::SigningKey) -> Principal {
        use k256::elliptic_curve::sec1::ToEncodedPoint;
        let point = signing_key.verifying_key().to_encoded_point(true);
        let hash = snap2p_crypto::principal::hash160(point.as_bytes());
        let addr = snap2p_crypto::principal::c32_address(
            snap2p_crypto::principal::VERSION_MAINNET_SINGLESIG,
            &hash,
        );
        format!("stacks:{addr}")
            .parse()
            .expect("c32_address always produces a well-formed principal")
    }
}

impl Wallet for EphemeralWallet {
    fn principal(&self) -> Principal {
        self.principal.clone()
    }

    fn sign(&self, message_hash: &[u8; 32]) -> [u8; 65] {
        use k256::ecdsa::signature::hazmat::PrehashSigner;
        let (sig, recid): (k256::ecdsa::Signature, k256::ecdsa::RecoveryId) = self
            .signing_key
            .sign_prehash_recoverable(message_hash)
            .expect("signing a 32-byte prehash cannot fail");
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recid.to_byte();
        out
    }
}
