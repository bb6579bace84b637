//! HMAC-SHA-256 over canonical payload bytes.
//!
//! The master license is integrity-protected by an HMAC keyed from the slot
//! derived alongside the key-encryption key, not by an asymmetric signature:
//! it never leaves the issuer.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CryptoError;
use crate::slot::{CryptoContext, SlotId, SlotMaterial};

type HmacSha256 = Hmac<Sha256>;

impl CryptoContext {
    /// Compute HMAC-SHA-256 over `data` with the HMAC slot. Hex-encoded.
    pub fn hmac(&self, slot: SlotId, data: &[u8]) -> Result<String, CryptoError> {
        self.with_slot(slot, |material| {
            let SlotMaterial::Hmac { key } = material else {
                return Err(CryptoError::AlgMismatch {
                    reason: "slot does not hold an HMAC key".into(),
                });
            };
            let mut mac = HmacSha256::new_from_slice(key)
                .map_err(|e| CryptoError::primitive(e.to_string()))?;
            mac.update(data);
            Ok(hex::encode(mac.finalize().into_bytes()))
        })
    }

    /// Verify a hex HMAC-SHA-256 tag in constant time.
    pub fn hmac_verify(&self, slot: SlotId, data: &[u8], tag_hex: &str) -> Result<(), CryptoError> {
        let expected =
            hex::decode(tag_hex).map_err(|_| CryptoError::invalid("HMAC tag is not hex"))?;
        self.with_slot(slot, |material| {
            let SlotMaterial::Hmac { key } = material else {
                return Err(CryptoError::AlgMismatch {
                    reason: "slot does not hold an HMAC key".into(),
                });
            };
            let mut mac = HmacSha256::new_from_slice(key)
                .map_err(|e| CryptoError::primitive(e.to_string()))?;
            mac.update(data);
            mac.verify_slice(&expected)
                .map_err(|_| CryptoError::verify("HMAC mismatch"))
        })
    }

}

/// One-shot HMAC-SHA-256 with a raw key, hex-encoded. Used for the
/// authorization token in the validation protocol, where the key is a fresh
/// ECDH-derived secret rather than slot material.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<String, CryptoError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| CryptoError::primitive(e.to_string()))?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroize::Zeroizing;

    fn hmac_slot(ctx: &CryptoContext, key: &[u8]) -> SlotId {
        ctx.insert(SlotMaterial::Hmac {
            key: Zeroizing::new(key.to_vec()),
        })
        .unwrap()
    }

    #[test]
    fn test_hmac_roundtrip() {
        let ctx = CryptoContext::new();
        let slot = hmac_slot(&ctx, &[0x42u8; 32]);
        let tag = ctx.hmac(slot, b"master license payload").unwrap();
        ctx.hmac_verify(slot, b"master license payload", &tag)
            .unwrap();
    }

    #[test]
    fn test_hmac_tamper_detected() {
        let ctx = CryptoContext::new();
        let slot = hmac_slot(&ctx, &[0x42u8; 32]);
        let tag = ctx.hmac(slot, b"payload").unwrap();
        assert!(ctx.hmac_verify(slot, b"payloaD", &tag).is_err());

        let mut bad_tag = tag.into_bytes();
        bad_tag[0] ^= 0x01;
        let bad_tag = String::from_utf8(bad_tag).unwrap();
        assert!(ctx.hmac_verify(slot, b"payload", &bad_tag).is_err());
    }

    #[test]
    fn test_hmac_key_separation() {
        let ctx = CryptoContext::new();
        let a = hmac_slot(&ctx, &[1u8; 32]);
        let b = hmac_slot(&ctx, &[2u8; 32]);
        let tag = ctx.hmac(a, b"payload").unwrap();
        assert!(ctx.hmac_verify(b, b"payload", &tag).is_err());
    }
}
