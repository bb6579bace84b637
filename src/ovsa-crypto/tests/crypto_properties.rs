//! Property-based tests for the crypto primitive layer.
//!
//! These exercise the tamper-resistance and round-trip invariants that the
//! higher layers depend on: every bit of ciphertext, tag, nonce, and wrap
//! blob must matter.

use proptest::prelude::*;

use ovsa_crypto::{verify_with_public_key, CryptoContext, EcdsaAlgorithm};

/// Strategy for plaintext buffers of assorted sizes.
fn plaintext_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..4096)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    /// decrypt(encrypt(m, K), K) == m for all m.
    #[test]
    fn aead_roundtrip(plaintext in plaintext_strategy()) {
        let ctx = CryptoContext::new();
        let slot = ctx.generate_symmetric_key(256).unwrap();

        let enc = ctx.encrypt_mem(slot, &plaintext).unwrap();
        let dec = ctx.decrypt_mem(slot, &enc.iv, &enc.ciphertext).unwrap();
        prop_assert_eq!(dec, plaintext);
    }

    /// Flipping any single bit of the ciphertext (tag included) fails
    /// authentication and yields no plaintext.
    #[test]
    fn aead_single_bit_flip_fails(
        plaintext in plaintext_strategy(),
        byte_index in any::<prop::sample::Index>(),
        bit in 0u8..8
    ) {
        let ctx = CryptoContext::new();
        let slot = ctx.generate_symmetric_key(256).unwrap();

        let mut enc = ctx.encrypt_mem(slot, &plaintext).unwrap();
        let index = byte_index.index(enc.ciphertext.len());
        enc.ciphertext[index] ^= 1 << bit;

        prop_assert!(ctx.decrypt_mem(slot, &enc.iv, &enc.ciphertext).is_err());
    }

    /// Flipping any single bit of the nonce fails authentication.
    #[test]
    fn aead_nonce_flip_fails(
        plaintext in plaintext_strategy(),
        byte_index in 0usize..12,
        bit in 0u8..8
    ) {
        let ctx = CryptoContext::new();
        let slot = ctx.generate_symmetric_key(256).unwrap();

        let mut enc = ctx.encrypt_mem(slot, &plaintext).unwrap();
        enc.iv[byte_index] ^= 1 << bit;

        prop_assert!(ctx.decrypt_mem(slot, &enc.iv, &enc.ciphertext).is_err());
    }

    /// A DER signature survives round-trip verification and rejects any
    /// single-bit change to the signed data.
    #[test]
    fn ecdsa_sign_verify_and_tamper(
        data in plaintext_strategy(),
        byte_index in any::<prop::sample::Index>(),
        bit in 0u8..8
    ) {
        let ctx = CryptoContext::new();
        let slot = ctx.generate_asymmetric_key(EcdsaAlgorithm::P256).unwrap();
        let pubkey = ctx.public_key(slot).unwrap();

        let sig = ctx.sign(slot, &data).unwrap();
        prop_assert!(verify_with_public_key(&pubkey, &data, &sig).is_ok());

        let mut tampered = data.clone();
        let index = byte_index.index(tampered.len());
        tampered[index] ^= 1 << bit;
        prop_assert!(verify_with_public_key(&pubkey, &tampered, &sig).is_err());
    }

    /// Unwrapping recovers exactly the wrapped key, and the wrap blob is
    /// freshly randomized per call.
    #[test]
    fn wrap_unwrap_roundtrip(_seed in any::<u64>()) {
        let ctx = CryptoContext::new();
        let asym = ctx.generate_asymmetric_key(EcdsaAlgorithm::P256).unwrap();
        let sym = ctx.generate_symmetric_key(256).unwrap();
        let original = ctx.export_symmetric_key(sym).unwrap();

        let target = ctx.public_key(asym).unwrap();
        let first = ctx.wrap_key(&target, sym).unwrap();
        let second = ctx.wrap_key(&target, sym).unwrap();
        prop_assert_ne!(&first.blob, &second.blob);

        let (recovered, _) = ctx.unwrap_key(asym, &first.blob).unwrap();
        prop_assert_eq!(
            ctx.export_symmetric_key(recovered).unwrap().to_vec(),
            original.to_vec()
        );
    }
}
