//! Signature and HMAC envelopes around canonical JSON payloads.
//!
//! Every artifact file is a single top-level object, either
//! `{"payload": {...}, "signature": "<base64 ECDSA DER>"}` or
//! `{"payload": {...}, "hmac": "<hex SHA-256>"}`. The signature or tag
//! always covers the canonical bytes of `payload` alone; the file itself may
//! be pretty-printed, re-ordered, or re-encoded without invalidating it.

use std::path::Path;

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use ovsa_crypto::{
    public_key_from_cert, to_canonical_bytes, verify_with_public_key, CryptoContext, SlotId,
};

use crate::error::OvsaError;

/// An ECDSA-signed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedBlob<T> {
    /// The protected object.
    pub payload: T,
    /// base64 DER ECDSA signature over the canonical payload bytes.
    pub signature: String,
}

impl<T: Serialize + DeserializeOwned> SignedBlob<T> {
    /// Sign `payload` with the asymmetric slot.
    pub fn create(ctx: &CryptoContext, slot: SlotId, payload: T) -> Result<Self, OvsaError> {
        let canonical = to_canonical_bytes(&payload)?;
        let signature = ctx.sign(slot, &canonical)?;
        Ok(Self {
            payload,
            signature: base64::engine::general_purpose::STANDARD.encode(signature),
        })
    }

    /// Verify the signature against the public key in a PEM certificate.
    pub fn verify(&self, cert_pem: &str) -> Result<(), OvsaError> {
        let canonical = to_canonical_bytes(&self.payload)?;
        let signature = base64::engine::general_purpose::STANDARD
            .decode(&self.signature)
            .map_err(|_| OvsaError::verify("signature is not valid base64"))?;
        let public_key = public_key_from_cert(cert_pem)?;
        verify_with_public_key(&public_key, &canonical, &signature)?;
        Ok(())
    }

    /// Parse a signed blob from a JSON file.
    pub fn read_from(path: &Path) -> Result<Self, OvsaError> {
        let raw =
            std::fs::read(path).map_err(|e| OvsaError::io(path.display().to_string(), e))?;
        serde_json::from_slice(&raw)
            .map_err(|e| OvsaError::invalid(format!("{}: {e}", path.display())))
    }

    /// Write the blob as JSON to a file.
    pub fn write_to(&self, path: &Path) -> Result<(), OvsaError> {
        let rendered = serde_json::to_vec(self)
            .map_err(|e| OvsaError::invalid(format!("envelope render: {e}")))?;
        std::fs::write(path, rendered).map_err(|e| OvsaError::io(path.display().to_string(), e))
    }
}

/// An HMAC-protected payload (the master license, which never leaves the
/// issuer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacBlob<T> {
    /// The protected object.
    pub payload: T,
    /// Hex HMAC-SHA-256 over the canonical payload bytes.
    pub hmac: String,
}

impl<T: Serialize + DeserializeOwned> MacBlob<T> {
    /// Tag `payload` with the HMAC slot.
    pub fn create(ctx: &CryptoContext, hmac_slot: SlotId, payload: T) -> Result<Self, OvsaError> {
        let canonical = to_canonical_bytes(&payload)?;
        let hmac = ctx.hmac(hmac_slot, &canonical)?;
        Ok(Self { payload, hmac })
    }

    /// Verify the tag with the HMAC slot.
    pub fn verify(&self, ctx: &CryptoContext, hmac_slot: SlotId) -> Result<(), OvsaError> {
        let canonical = to_canonical_bytes(&self.payload)?;
        ctx.hmac_verify(hmac_slot, &canonical, &self.hmac)?;
        Ok(())
    }

    /// Parse a MAC blob from a JSON file.
    pub fn read_from(path: &Path) -> Result<Self, OvsaError> {
        let raw =
            std::fs::read(path).map_err(|e| OvsaError::io(path.display().to_string(), e))?;
        serde_json::from_slice(&raw)
            .map_err(|e| OvsaError::invalid(format!("{}: {e}", path.display())))
    }

    /// Write the blob as JSON to a file.
    pub fn write_to(&self, path: &Path) -> Result<(), OvsaError> {
        let rendered = serde_json::to_vec(self)
            .map_err(|e| OvsaError::invalid(format!("envelope render: {e}")))?;
        std::fs::write(path, rendered).map_err(|e| OvsaError::io(path.display().to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsa_crypto::EcdsaAlgorithm;
    use serde_json::json;

    fn signing_setup() -> (CryptoContext, SlotId) {
        let ctx = CryptoContext::new();
        let slot = ctx.generate_asymmetric_key(EcdsaAlgorithm::P256).unwrap();
        (ctx, slot)
    }

    #[test]
    fn test_signed_blob_roundtrip_via_public_key() {
        let (ctx, slot) = signing_setup();
        let blob = SignedBlob::create(&ctx, slot, json!({"b": 2, "a": 1})).unwrap();

        // Verify manually against the slot public key: the envelope signs
        // canonical bytes, independent of field order.
        let canonical = to_canonical_bytes(&blob.payload).unwrap();
        let sig = base64::engine::general_purpose::STANDARD
            .decode(&blob.signature)
            .unwrap();
        verify_with_public_key(&ctx.public_key(slot).unwrap(), &canonical, &sig).unwrap();
    }

    #[test]
    fn test_signed_blob_survives_field_reordering() {
        let (ctx, slot) = signing_setup();
        let blob = SignedBlob::create(&ctx, slot, json!({"x": 1, "y": "two"})).unwrap();

        let rendered = serde_json::to_string(&blob).unwrap();
        let reparsed: SignedBlob<serde_json::Value> = serde_json::from_str(&rendered).unwrap();
        assert_eq!(
            to_canonical_bytes(&reparsed.payload).unwrap(),
            to_canonical_bytes(&blob.payload).unwrap()
        );
    }

    #[test]
    fn test_mac_blob_roundtrip_and_tamper() {
        let ctx = CryptoContext::new();
        let asym = ctx.generate_asymmetric_key(EcdsaAlgorithm::P256).unwrap();
        let sym = ctx.generate_symmetric_key(256).unwrap();
        let wrapped = ctx.wrap_key(&ctx.public_key(asym).unwrap(), sym).unwrap();

        let blob = MacBlob::create(&ctx, wrapped.hmac_slot, json!({"k": "v"})).unwrap();
        blob.verify(&ctx, wrapped.hmac_slot).unwrap();

        let mut tampered = blob.clone();
        tampered.payload = json!({"k": "w"});
        assert!(tampered.verify(&ctx, wrapped.hmac_slot).is_err());
    }
}
