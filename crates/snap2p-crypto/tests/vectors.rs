//! Cryptographic test vectors from official specifications.
//!
//! - RFC 7748 (X25519)
//! - RFC 5869 (HKDF-SHA256)
//! - NIST FIPS 180-4 (SHA-256)
//!
//! These ensure our primitive wrappers match the specifications exactly.
//! ChaCha20-Poly1305 itself is exercised only through the Noise_XX
//! integration test below: this crate has no standalone AEAD wrapper, so
//! there is no surface to hold a dedicated RFC 8439 vector against.

use snap2p_crypto::hash;
use snap2p_crypto::noise::{NoiseHandshake, NoiseKeypair};
use snap2p_crypto::x25519::{PrivateKey, PublicKey};

fn decode_hex(hex: &str) -> Vec<u8> {
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
        .collect()
}

// ============================================================================
// RFC 7748 Test Vectors (X25519)
// ============================================================================

#[test]
fn test_x25519_rfc7748_vector_1() {
    let alice_private =
        decode_hex("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a");
    let alice_public_expected =
        decode_hex("8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a");

    let bob_private =
        decode_hex("5dab087e624a8a4b79e17f8b83800ee66f3bb1292618b6fd1c2f8b27ff88e0eb");
    let bob_public_expected =
        decode_hex("de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f");

    let shared_expected =
        decode_hex("4a5d9d5ba4ce2de1728e3bf480350f25e07e21c947d19e3376f09b3c1e161742");

    let mut alice_bytes = [0u8; 32];
    alice_bytes.copy_from_slice(&alice_private[..32]);
    let alice = PrivateKey::from_bytes(alice_bytes);
    let alice_public = alice.public_key();

    let mut bob_bytes = [0u8; 32];
    bob_bytes.copy_from_slice(&bob_private[..32]);
    let bob = PrivateKey::from_bytes(bob_bytes);
    let bob_public = bob.public_key();

    assert_eq!(alice_public.to_bytes().to_vec(), alice_public_expected[..32]);
    assert_eq!(bob_public.to_bytes().to_vec(), bob_public_expected[..32]);

    let alice_shared = alice.exchange(&bob_public).expect("DH exchange failed");
    let bob_shared = bob.exchange(&alice_public).expect("DH exchange failed");

    assert_eq!(alice_shared.as_bytes().to_vec(), shared_expected[..32]);
    assert_eq!(bob_shared.as_bytes().to_vec(), shared_expected[..32]);
}

#[test]
fn test_x25519_low_order_rejection() {
    let private = PrivateKey::generate(&mut rand_core::OsRng);
    let zero_public = PublicKey::from_bytes([0u8; 32]);
    assert!(private.exchange(&zero_public).is_none());
}

// ============================================================================
// SHA-256 / HKDF Test Vectors
// ============================================================================

#[test]
fn test_sha256_fips_vector() {
    // FIPS 180-4 SHA-256("abc")
    let digest = hash::hash(b"abc");
    let expected = decode_hex("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    assert_eq!(digest.to_vec(), expected[..32]);
}

#[test]
fn test_hkdf_rfc5869_case1() {
    let ikm = decode_hex("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b");
    let salt = decode_hex("000102030405060708090a0b0c");
    let info = decode_hex("f0f1f2f3f4f5f6f7f8f9");
    let expected = decode_hex(
        "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865",
    );

    let mut okm = vec![0u8; 42];
    hash::hkdf(&salt, &ikm, &info, &mut okm);
    assert_eq!(okm, expected);
}

// ============================================================================
// Noise_XX integration (also the only place ChaCha20-Poly1305 runs: as the
// Noise transport cipher via `snow`)
// ============================================================================

#[test]
fn test_noise_xx_handshake_produces_matching_transport_keys() {
    let alice_static = NoiseKeypair::generate().unwrap();
    let bob_static = NoiseKeypair::generate().unwrap();

    let mut alice = NoiseHandshake::new_initiator(&alice_static).unwrap();
    let mut bob = NoiseHandshake::new_responder(&bob_static).unwrap();

    let msg1 = alice.write_message(&[]).unwrap();
    bob.read_message(&msg1).unwrap();

    let msg2 = bob.write_message(&[]).unwrap();
    alice.read_message(&msg2).unwrap();

    let msg3 = alice.write_message(&[]).unwrap();
    bob.read_message(&msg3).unwrap();

    assert!(alice.is_complete());
    assert!(bob.is_complete());

    let mut alice_transport = alice.into_transport().unwrap();
    let mut bob_transport = bob.into_transport().unwrap();

    // The transcript-derived transport keys match directionally: what
    // alice encrypts as sender, bob must decrypt as receiver, and vice
    // versa.
    let a_to_b = alice_transport.write_message(b"alice to bob").unwrap();
    assert_eq!(bob_transport.read_message(&a_to_b).unwrap(), b"alice to bob");

    let b_to_a = bob_transport.write_message(b"bob to alice").unwrap();
    assert_eq!(alice_transport.read_message(&b_to_a).unwrap(), b"bob to alice");
}
