//! The protected bundle: encrypted model files under a signed payload.

use serde::{Deserialize, Serialize};

use ovsa_crypto::to_canonical_bytes;

use crate::envelope::SignedBlob;
use crate::error::OvsaError;

/// One encrypted model file, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedModelFile {
    /// Original file name.
    pub file_name: String,
    /// base64 96-bit AES-GCM nonce.
    pub iv: String,
    /// base64 ciphertext with the 16-byte GCM tag appended.
    pub ciphertext: String,
}

/// The signed body of a protect file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundlePayload {
    /// Model display name.
    pub model_name: String,
    /// Model description.
    pub description: String,
    /// Model version tag.
    pub version: String,
    /// Fresh v4 GUID minted by the protect run.
    pub model_guid: String,
    /// Issuer certificate, PEM, full chain when available.
    pub isv_certificate: String,
    /// Encrypted file entries, preserving input order.
    pub enc_model: Vec<EncryptedModelFile>,
}

/// A protected bundle as stored on disk.
pub type ProtectedBundle = SignedBlob<BundlePayload>;

impl BundlePayload {
    /// SHA-384 over the canonical payload bytes, hex. This is the
    /// `model_hash` every license binds to.
    pub fn model_hash(&self) -> Result<String, OvsaError> {
        Ok(ovsa_crypto::compute_hash(&to_canonical_bytes(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> BundlePayload {
        BundlePayload {
            model_name: "Face Detection".into(),
            description: "Face person detection retail".into(),
            version: "0002".into(),
            model_guid: "8c2b52e3-7b82-4a45-a6f9-7ce52bdcb4a0".into(),
            isv_certificate: "-----BEGIN CERTIFICATE-----\n...".into(),
            enc_model: vec![EncryptedModelFile {
                file_name: "face_detection.xml".into(),
                iv: "AAAAAAAAAAAAAAAA".into(),
                ciphertext: "AAAA".into(),
            }],
        }
    }

    #[test]
    fn test_model_hash_is_stable() {
        let payload = sample_payload();
        assert_eq!(payload.model_hash().unwrap(), payload.model_hash().unwrap());
        assert_eq!(payload.model_hash().unwrap().len(), 96);
    }

    #[test]
    fn test_model_hash_covers_every_field() {
        let base = sample_payload().model_hash().unwrap();

        let mut changed = sample_payload();
        changed.enc_model[0].ciphertext = "BBBB".into();
        assert_ne!(changed.model_hash().unwrap(), base);

        let mut changed = sample_payload();
        changed.model_guid = "97bc4c19-61ab-4a7a-a223-895c8cdc52fb".into();
        assert_ne!(changed.model_hash().unwrap(), base);
    }
}
