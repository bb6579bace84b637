//! # ovsa-crypto
//!
//! Cryptographic primitives for the OVSA model protection toolchain.
//!
//! This crate binds the individual primitives the toolchain needs - ECDSA
//! P-256/P-384, ECDH + HKDF key wrapping, AES-256-GCM, HMAC-SHA-256,
//! SHA-256/384 digests, X.509 verification with OCSP - behind a key-slot
//! model: all secret material lives in numbered slots owned by a
//! [`CryptoContext`], is only reachable through the primitive operations,
//! and is zeroized when a slot is cleared or the context is dropped.
//!
//! ## Slot discipline
//!
//! ```rust,ignore
//! let ctx = CryptoContext::new();
//! let asym = ctx.import_asymmetric_key(alg, &scalar, Some(cert_pem))?;
//! let sym = ctx.generate_symmetric_key(256)?;
//! let enc = ctx.encrypt_mem(sym, &plaintext)?;
//! // ctx drops here: both slots are zeroized on every exit path.
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::missing_errors_doc)] // Error documentation not required

mod aead;
mod canonical;
mod cert;
mod digest;
mod ecdsa;
mod error;
mod kex;
mod mac;
mod ocsp;
mod slot;

pub use aead::{EncryptedBuffer, GCM_IV_SIZE, GCM_TAG_SIZE};
pub use canonical::to_canonical_bytes;
pub use cert::{
    der_to_pem, fingerprints_match, pem_chain_to_der, public_key_from_cert, subject_and_issuer,
    verify_certificate, CertVerifyOptions,
};
pub use digest::{compute_hash, sha256, spki_fingerprint, spki_fingerprint_der};
pub use ecdsa::{verify_with_public_key, EcdsaAlgorithm};
pub use error::CryptoError;
pub use kex::{ProtocolKex, WrappedKey};
pub use mac::hmac_sha256;
pub use ocsp::OcspOptions;
pub use slot::{
    CryptoContext, SlotId, HMAC_KEY_SIZE, MAX_KEY_SLOT, MIN_KEY_SLOT, SYMMETRIC_KEY_SIZE,
};

use rand_core::{OsRng, RngCore};

/// Generate a fresh RFC 4122 v4 GUID string.
#[must_use]
pub fn generate_guid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Check that a string is a syntactically valid RFC 4122 UUID.
#[must_use]
pub fn is_guid_valid(guid: &str) -> bool {
    uuid::Uuid::parse_str(guid).is_ok()
}

/// Draw a 32-byte random nonce, hex-encoded, for the validation protocol.
#[must_use]
pub fn random_nonce() -> String {
    let mut nonce = [0u8; 32];
    OsRng.fill_bytes(&mut nonce);
    hex::encode(nonce)
}

/// Constant-time byte comparison for signatures, MACs, and hashes.
///
/// The length check still returns early; lengths are not secret here.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_generation_is_valid_v4() {
        let guid = generate_guid();
        assert!(is_guid_valid(&guid));
        assert_eq!(guid.len(), 36);
    }

    #[test]
    fn test_guid_validation() {
        assert!(is_guid_valid("50934a64-5d1b-4655-bcb4-80080fcb8858"));
        assert!(!is_guid_valid("50934a64-5d1b-4655-bcb4"));
        assert!(!is_guid_valid("not-a-guid"));
    }

    #[test]
    fn test_nonce_uniqueness() {
        assert_ne!(random_nonce(), random_nonce());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
