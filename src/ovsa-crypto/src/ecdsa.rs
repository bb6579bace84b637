//! ECDSA signing and verification over the NIST P-256 and P-384 curves.
//!
//! Signatures are emitted in ASN.1 DER form, base64-encoded when they are
//! carried inside JSON envelopes. P-256 is the default for issuer and
//! customer keys; P-384 is accepted for deployments that require it.

use p256::ecdsa::signature::{Signer, Verifier};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::slot::{CryptoContext, SlotId, SlotMaterial};

/// Supported ECDSA curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EcdsaAlgorithm {
    /// ECDSA with NIST P-256 (secp256r1), SHA-256 digest.
    #[default]
    #[serde(rename = "ECDSA_P256")]
    P256,
    /// ECDSA with NIST P-384 (secp384r1), SHA-384 digest.
    #[serde(rename = "ECDSA_P384")]
    P384,
}

impl EcdsaAlgorithm {
    /// Size in bytes of a private scalar for this curve.
    #[must_use]
    pub const fn scalar_size(&self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
        }
    }
}

impl CryptoContext {
    /// Generate a fresh ECDSA keypair in a new asymmetric slot.
    pub fn generate_asymmetric_key(
        &self,
        algorithm: EcdsaAlgorithm,
    ) -> Result<SlotId, CryptoError> {
        let private_key = match algorithm {
            EcdsaAlgorithm::P256 => {
                let sk = p256::ecdsa::SigningKey::random(&mut OsRng);
                Zeroizing::new(sk.to_bytes().to_vec())
            }
            EcdsaAlgorithm::P384 => {
                let sk = p384::ecdsa::SigningKey::random(&mut OsRng);
                Zeroizing::new(sk.to_bytes().to_vec())
            }
        };
        self.insert(SlotMaterial::Asymmetric {
            algorithm,
            private_key,
            certificate: None,
        })
    }

    /// Load an existing private scalar into a new asymmetric slot.
    pub fn import_asymmetric_key(
        &self,
        algorithm: EcdsaAlgorithm,
        private_key: &[u8],
        certificate: Option<String>,
    ) -> Result<SlotId, CryptoError> {
        if private_key.len() != algorithm.scalar_size() {
            return Err(CryptoError::invalid(format!(
                "private scalar must be {} bytes for {algorithm:?}",
                algorithm.scalar_size()
            )));
        }
        // Reject scalars outside the curve order up front.
        match algorithm {
            EcdsaAlgorithm::P256 => {
                p256::ecdsa::SigningKey::from_slice(private_key)
                    .map_err(|e| CryptoError::invalid(format!("bad P-256 scalar: {e}")))?;
            }
            EcdsaAlgorithm::P384 => {
                p384::ecdsa::SigningKey::from_slice(private_key)
                    .map_err(|e| CryptoError::invalid(format!("bad P-384 scalar: {e}")))?;
            }
        }
        self.insert(SlotMaterial::Asymmetric {
            algorithm,
            private_key: Zeroizing::new(private_key.to_vec()),
            certificate,
        })
    }

    /// Sign `data` with the asymmetric slot. Returns a DER signature.
    pub fn sign(&self, slot: SlotId, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.with_slot(slot, |material| {
            let SlotMaterial::Asymmetric {
                algorithm,
                private_key,
                ..
            } = material
            else {
                return Err(CryptoError::AlgMismatch {
                    reason: "slot does not hold an asymmetric keypair".into(),
                });
            };
            match algorithm {
                EcdsaAlgorithm::P256 => {
                    let sk = p256::ecdsa::SigningKey::from_slice(private_key)
                        .map_err(|e| CryptoError::primitive(e.to_string()))?;
                    let sig: p256::ecdsa::Signature = sk.sign(data);
                    Ok(sig.to_der().as_bytes().to_vec())
                }
                EcdsaAlgorithm::P384 => {
                    let sk = p384::ecdsa::SigningKey::from_slice(private_key)
                        .map_err(|e| CryptoError::primitive(e.to_string()))?;
                    let sig: p384::ecdsa::Signature = sk.sign(data);
                    Ok(sig.to_der().as_bytes().to_vec())
                }
            }
        })
    }

    /// The uncompressed SEC1 public key for an asymmetric slot.
    pub fn public_key(&self, slot: SlotId) -> Result<Vec<u8>, CryptoError> {
        self.with_slot(slot, |material| {
            let SlotMaterial::Asymmetric {
                algorithm,
                private_key,
                ..
            } = material
            else {
                return Err(CryptoError::AlgMismatch {
                    reason: "slot does not hold an asymmetric keypair".into(),
                });
            };
            match algorithm {
                EcdsaAlgorithm::P256 => {
                    let sk = p256::ecdsa::SigningKey::from_slice(private_key)
                        .map_err(|e| CryptoError::primitive(e.to_string()))?;
                    Ok(sk
                        .verifying_key()
                        .to_encoded_point(false)
                        .as_bytes()
                        .to_vec())
                }
                EcdsaAlgorithm::P384 => {
                    let sk = p384::ecdsa::SigningKey::from_slice(private_key)
                        .map_err(|e| CryptoError::primitive(e.to_string()))?;
                    Ok(sk
                        .verifying_key()
                        .to_encoded_point(false)
                        .as_bytes()
                        .to_vec())
                }
            }
        })
    }

    /// The curve of an asymmetric slot.
    pub fn algorithm(&self, slot: SlotId) -> Result<EcdsaAlgorithm, CryptoError> {
        self.with_slot(slot, |material| match material {
            SlotMaterial::Asymmetric { algorithm, .. } => Ok(*algorithm),
            _ => Err(CryptoError::AlgMismatch {
                reason: "slot does not hold an asymmetric keypair".into(),
            }),
        })
    }

    /// The PEM certificate attached to an asymmetric slot.
    pub fn certificate(&self, slot: SlotId) -> Result<String, CryptoError> {
        self.with_slot(slot, |material| match material {
            SlotMaterial::Asymmetric {
                certificate: Some(cert),
                ..
            } => Ok(cert.clone()),
            SlotMaterial::Asymmetric { .. } => Err(CryptoError::cert("no certificate attached")),
            _ => Err(CryptoError::AlgMismatch {
                reason: "slot does not hold an asymmetric keypair".into(),
            }),
        })
    }
}

/// Verify a DER ECDSA signature against an uncompressed SEC1 public key.
///
/// The curve is inferred from the public key length (65 bytes for P-256,
/// 97 for P-384).
pub fn verify_with_public_key(
    public_key: &[u8],
    data: &[u8],
    der_signature: &[u8],
) -> Result<(), CryptoError> {
    match public_key.len() {
        65 => {
            let vk = p256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
                .map_err(|e| CryptoError::invalid(format!("bad P-256 public key: {e}")))?;
            let sig = p256::ecdsa::Signature::from_der(der_signature)
                .map_err(|e| CryptoError::invalid(format!("bad DER signature: {e}")))?;
            vk.verify(data, &sig)
                .map_err(|_| CryptoError::verify("ECDSA signature mismatch"))
        }
        97 => {
            let vk = p384::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
                .map_err(|e| CryptoError::invalid(format!("bad P-384 public key: {e}")))?;
            let sig = p384::ecdsa::Signature::from_der(der_signature)
                .map_err(|e| CryptoError::invalid(format!("bad DER signature: {e}")))?;
            vk.verify(data, &sig)
                .map_err(|_| CryptoError::verify("ECDSA signature mismatch"))
        }
        n => Err(CryptoError::invalid(format!(
            "unsupported public key length {n}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_p256() {
        let ctx = CryptoContext::new();
        let slot = ctx.generate_asymmetric_key(EcdsaAlgorithm::P256).unwrap();
        let sig = ctx.sign(slot, b"payload").unwrap();
        let pubkey = ctx.public_key(slot).unwrap();
        verify_with_public_key(&pubkey, b"payload", &sig).unwrap();
    }

    #[test]
    fn test_sign_verify_p384() {
        let ctx = CryptoContext::new();
        let slot = ctx.generate_asymmetric_key(EcdsaAlgorithm::P384).unwrap();
        let sig = ctx.sign(slot, b"payload").unwrap();
        let pubkey = ctx.public_key(slot).unwrap();
        verify_with_public_key(&pubkey, b"payload", &sig).unwrap();
    }

    #[test]
    fn test_corrupted_signature_rejected() {
        let ctx = CryptoContext::new();
        let slot = ctx.generate_asymmetric_key(EcdsaAlgorithm::P256).unwrap();
        let sig = ctx.sign(slot, b"payload").unwrap();
        let pubkey = ctx.public_key(slot).unwrap();
        assert!(verify_with_public_key(&pubkey, b"tampered", &sig).is_err());
    }

    #[test]
    fn test_import_roundtrip() {
        let ctx = CryptoContext::new();
        let slot = ctx.generate_asymmetric_key(EcdsaAlgorithm::P256).unwrap();
        let pubkey = ctx.public_key(slot).unwrap();

        let sk = p256::ecdsa::SigningKey::random(&mut OsRng);
        let other = ctx
            .import_asymmetric_key(EcdsaAlgorithm::P256, &sk.to_bytes(), None)
            .unwrap();
        assert_ne!(ctx.public_key(other).unwrap(), pubkey);
    }

    #[test]
    fn test_symmetric_slot_cannot_sign() {
        let ctx = CryptoContext::new();
        let slot = ctx.import_symmetric_key(&[9u8; 32]).unwrap();
        assert!(matches!(
            ctx.sign(slot, b"data"),
            Err(CryptoError::AlgMismatch { .. })
        ));
    }
}
