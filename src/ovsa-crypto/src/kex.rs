//! Key wrapping: ECDH to a static public key, HKDF-SHA-256, AES-256-GCM.
//!
//! The wrap operation derives 64 bytes of HKDF output from the ECDH shared
//! secret between a fresh ephemeral key and the target's static public key.
//! Bytes 0..32 become the key-encryption key; bytes 32..64 become the HMAC
//! key that accompanies the wrap (the master license is HMAC-protected with
//! it). Because the ephemeral public key travels inside the wrap blob, the
//! holder of the target private key can re-derive both halves.
//!
//! ## Wrap blob layout (base64 when embedded in JSON)
//!
//! ```text
//! [version (1)] [curve tag (1)] [ephemeral SEC1 uncompressed (65|97)]
//! [GCM IV (12)] [wrapped key + tag (48)]
//! ```

use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::aead::GCM_IV_SIZE;
use crate::ecdsa::EcdsaAlgorithm;
use crate::error::CryptoError;
use crate::slot::{CryptoContext, SlotId, SlotMaterial};

const WRAP_VERSION: u8 = 1;
const CURVE_TAG_P256: u8 = 1;
const CURVE_TAG_P384: u8 = 2;
const HKDF_INFO: &[u8] = b"model-key-wrap";

/// A wrap operation's outputs: the wire blob and the HMAC slot derived
/// alongside the key-encryption key.
pub struct WrappedKey {
    /// Binary wrap blob, layout documented at module level.
    pub blob: Vec<u8>,
    /// Slot holding the HKDF-derived HMAC key.
    pub hmac_slot: SlotId,
}

impl CryptoContext {
    /// Wrap the symmetric key in `sym_slot` to `target_public_key` (SEC1
    /// uncompressed, curve inferred from length).
    pub fn wrap_key(
        &self,
        target_public_key: &[u8],
        sym_slot: SlotId,
    ) -> Result<WrappedKey, CryptoError> {
        let plain_key = self.export_symmetric_key(sym_slot)?;

        let (curve_tag, ephemeral_public, shared) = match target_public_key.len() {
            65 => {
                let their = p256::PublicKey::from_sec1_bytes(target_public_key)
                    .map_err(|e| CryptoError::invalid(format!("bad P-256 public key: {e}")))?;
                let eph = p256::ecdh::EphemeralSecret::random(&mut OsRng);
                let eph_pub = eph.public_key().to_sec1_bytes().to_vec();
                let shared = eph.diffie_hellman(&their);
                (
                    CURVE_TAG_P256,
                    eph_pub,
                    Zeroizing::new(shared.raw_secret_bytes().to_vec()),
                )
            }
            97 => {
                let their = p384::PublicKey::from_sec1_bytes(target_public_key)
                    .map_err(|e| CryptoError::invalid(format!("bad P-384 public key: {e}")))?;
                let eph = p384::ecdh::EphemeralSecret::random(&mut OsRng);
                let eph_pub = eph.public_key().to_sec1_bytes().to_vec();
                let shared = eph.diffie_hellman(&their);
                (
                    CURVE_TAG_P384,
                    eph_pub,
                    Zeroizing::new(shared.raw_secret_bytes().to_vec()),
                )
            }
            n => {
                return Err(CryptoError::invalid(format!(
                    "unsupported public key length {n}"
                )))
            }
        };

        let (kek, hmac_key) = derive_kek_and_hmac(&shared)?;
        let kek_slot = self.import_symmetric_key(&kek[..])?;
        let enc = self.encrypt_mem(kek_slot, &plain_key);
        self.clear_slot(kek_slot);
        let enc = enc?;

        let mut blob = Vec::with_capacity(2 + ephemeral_public.len() + GCM_IV_SIZE + 48);
        blob.push(WRAP_VERSION);
        blob.push(curve_tag);
        blob.extend_from_slice(&ephemeral_public);
        blob.extend_from_slice(&enc.iv);
        blob.extend_from_slice(&enc.ciphertext);

        let hmac_slot = self.insert(SlotMaterial::Hmac {
            key: Zeroizing::new(hmac_key.to_vec()),
        })?;
        Ok(WrappedKey { blob, hmac_slot })
    }

    /// Unwrap a blob produced by [`CryptoContext::wrap_key`] with the private
    /// key in `asym_slot`. Returns the recovered symmetric slot and the
    /// re-derived HMAC slot.
    pub fn unwrap_key(
        &self,
        asym_slot: SlotId,
        blob: &[u8],
    ) -> Result<(SlotId, SlotId), CryptoError> {
        if blob.len() < 2 {
            return Err(CryptoError::invalid("wrap blob truncated"));
        }
        if blob[0] != WRAP_VERSION {
            return Err(CryptoError::invalid(format!(
                "unknown wrap blob version {}",
                blob[0]
            )));
        }
        let (point_len, expected_alg) = match blob[1] {
            CURVE_TAG_P256 => (65usize, EcdsaAlgorithm::P256),
            CURVE_TAG_P384 => (97usize, EcdsaAlgorithm::P384),
            t => return Err(CryptoError::invalid(format!("unknown curve tag {t}"))),
        };
        if blob.len() < 2 + point_len + GCM_IV_SIZE + 16 {
            return Err(CryptoError::invalid("wrap blob truncated"));
        }
        if self.algorithm(asym_slot)? != expected_alg {
            return Err(CryptoError::AlgMismatch {
                reason: "wrap blob curve does not match private key".into(),
            });
        }

        let ephemeral = &blob[2..2 + point_len];
        let iv = &blob[2 + point_len..2 + point_len + GCM_IV_SIZE];
        let wrapped = &blob[2 + point_len + GCM_IV_SIZE..];

        let shared = self.with_slot(asym_slot, |material| {
            let SlotMaterial::Asymmetric { private_key, .. } = material else {
                return Err(CryptoError::AlgMismatch {
                    reason: "slot does not hold an asymmetric keypair".into(),
                });
            };
            match expected_alg {
                EcdsaAlgorithm::P256 => {
                    let sk = p256::SecretKey::from_slice(private_key)
                        .map_err(|e| CryptoError::primitive(e.to_string()))?;
                    let their = p256::PublicKey::from_sec1_bytes(ephemeral)
                        .map_err(|e| CryptoError::invalid(format!("bad ephemeral key: {e}")))?;
                    let shared = p256::ecdh::diffie_hellman(
                        sk.to_nonzero_scalar(),
                        their.as_affine(),
                    );
                    Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
                }
                EcdsaAlgorithm::P384 => {
                    let sk = p384::SecretKey::from_slice(private_key)
                        .map_err(|e| CryptoError::primitive(e.to_string()))?;
                    let their = p384::PublicKey::from_sec1_bytes(ephemeral)
                        .map_err(|e| CryptoError::invalid(format!("bad ephemeral key: {e}")))?;
                    let shared = p384::ecdh::diffie_hellman(
                        sk.to_nonzero_scalar(),
                        their.as_affine(),
                    );
                    Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
                }
            }
        })?;

        let (kek, hmac_key) = derive_kek_and_hmac(&shared)?;
        let kek_slot = self.import_symmetric_key(&kek[..])?;
        let plain = self.decrypt_mem(kek_slot, iv, wrapped);
        self.clear_slot(kek_slot);
        let plain = Zeroizing::new(plain?);

        let sym_slot = self.import_symmetric_key(&plain)?;
        let hmac_slot = self.insert(SlotMaterial::Hmac {
            key: Zeroizing::new(hmac_key.to_vec()),
        })?;
        Ok((sym_slot, hmac_slot))
    }
}

/// One side of the short ECDH exchange in the validation protocol.
///
/// Both peers create one, swap public keys, and derive the same 32-byte
/// HMAC key for the authorization token. Always P-256.
pub struct ProtocolKex {
    secret: p256::ecdh::EphemeralSecret,
}

impl ProtocolKex {
    /// Generate a fresh ephemeral keypair.
    #[must_use]
    pub fn new() -> Self {
        Self {
            secret: p256::ecdh::EphemeralSecret::random(&mut OsRng),
        }
    }

    /// The SEC1 uncompressed public key to send to the peer.
    #[must_use]
    pub fn public_key(&self) -> Vec<u8> {
        self.secret.public_key().to_sec1_bytes().to_vec()
    }

    /// Consume the exchange and derive the shared authorization key.
    pub fn agree(self, peer_public: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let their = p256::PublicKey::from_sec1_bytes(peer_public)
            .map_err(|e| CryptoError::invalid(format!("bad peer kex key: {e}")))?;
        let shared = self.secret.diffie_hellman(&their);
        let hk = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes());
        let mut key = Zeroizing::new([0u8; 32]);
        hk.expand(b"validation-authorization", &mut key[..])
            .map_err(|e| CryptoError::primitive(format!("HKDF expand: {e}")))?;
        Ok(key)
    }
}

impl Default for ProtocolKex {
    fn default() -> Self {
        Self::new()
    }
}

/// Split 64 bytes of HKDF-SHA-256 output into (KEK, HMAC key).
fn derive_kek_and_hmac(
    shared: &[u8],
) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>), CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut okm = Zeroizing::new([0u8; 64]);
    hk.expand(HKDF_INFO, &mut okm[..])
        .map_err(|e| CryptoError::primitive(format!("HKDF expand: {e}")))?;

    let mut kek = Zeroizing::new([0u8; 32]);
    let mut hmac_key = Zeroizing::new([0u8; 32]);
    kek.copy_from_slice(&okm[..32]);
    hmac_key.copy_from_slice(&okm[32..]);
    Ok((kek, hmac_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_roundtrip_p256() {
        let ctx = CryptoContext::new();
        let asym = ctx.generate_asymmetric_key(EcdsaAlgorithm::P256).unwrap();
        let sym = ctx.generate_symmetric_key(256).unwrap();
        let original = ctx.export_symmetric_key(sym).unwrap();

        let target = ctx.public_key(asym).unwrap();
        let wrapped = ctx.wrap_key(&target, sym).unwrap();

        let (recovered, _) = ctx.unwrap_key(asym, &wrapped.blob).unwrap();
        assert_eq!(*ctx.export_symmetric_key(recovered).unwrap(), *original);
    }

    #[test]
    fn test_wrap_unwrap_roundtrip_p384() {
        let ctx = CryptoContext::new();
        let asym = ctx.generate_asymmetric_key(EcdsaAlgorithm::P384).unwrap();
        let sym = ctx.generate_symmetric_key(256).unwrap();
        let original = ctx.export_symmetric_key(sym).unwrap();

        let target = ctx.public_key(asym).unwrap();
        let wrapped = ctx.wrap_key(&target, sym).unwrap();

        let (recovered, _) = ctx.unwrap_key(asym, &wrapped.blob).unwrap();
        assert_eq!(*ctx.export_symmetric_key(recovered).unwrap(), *original);
    }

    #[test]
    fn test_hmac_slot_rederived_on_unwrap() {
        let ctx = CryptoContext::new();
        let asym = ctx.generate_asymmetric_key(EcdsaAlgorithm::P256).unwrap();
        let sym = ctx.generate_symmetric_key(256).unwrap();

        let target = ctx.public_key(asym).unwrap();
        let wrapped = ctx.wrap_key(&target, sym).unwrap();
        let tag = ctx.hmac(wrapped.hmac_slot, b"license payload").unwrap();

        let (_, hmac_slot) = ctx.unwrap_key(asym, &wrapped.blob).unwrap();
        ctx.hmac_verify(hmac_slot, b"license payload", &tag).unwrap();
    }

    #[test]
    fn test_rewrap_produces_distinct_blob() {
        let ctx = CryptoContext::new();
        let issuer = ctx.generate_asymmetric_key(EcdsaAlgorithm::P256).unwrap();
        let customer = ctx.generate_asymmetric_key(EcdsaAlgorithm::P256).unwrap();
        let sym = ctx.generate_symmetric_key(256).unwrap();

        let to_issuer = ctx.wrap_key(&ctx.public_key(issuer).unwrap(), sym).unwrap();
        let to_customer = ctx
            .wrap_key(&ctx.public_key(customer).unwrap(), sym)
            .unwrap();
        assert_ne!(to_issuer.blob, to_customer.blob);
    }

    #[test]
    fn test_wrong_private_key_fails() {
        let ctx = CryptoContext::new();
        let right = ctx.generate_asymmetric_key(EcdsaAlgorithm::P256).unwrap();
        let wrong = ctx.generate_asymmetric_key(EcdsaAlgorithm::P256).unwrap();
        let sym = ctx.generate_symmetric_key(256).unwrap();

        let wrapped = ctx.wrap_key(&ctx.public_key(right).unwrap(), sym).unwrap();
        assert!(ctx.unwrap_key(wrong, &wrapped.blob).is_err());
    }

    #[test]
    fn test_protocol_kex_agreement() {
        let client = ProtocolKex::new();
        let server = ProtocolKex::new();
        let client_pub = client.public_key();
        let server_pub = server.public_key();

        let client_key = client.agree(&server_pub).unwrap();
        let server_key = server.agree(&client_pub).unwrap();
        assert_eq!(*client_key, *server_key);
    }

    #[test]
    fn test_tampered_blob_fails() {
        let ctx = CryptoContext::new();
        let asym = ctx.generate_asymmetric_key(EcdsaAlgorithm::P256).unwrap();
        let sym = ctx.generate_symmetric_key(256).unwrap();

        let mut wrapped = ctx.wrap_key(&ctx.public_key(asym).unwrap(), sym).unwrap();
        let last = wrapped.blob.len() - 1;
        wrapped.blob[last] ^= 0x01;
        assert!(ctx.unwrap_key(asym, &wrapped.blob).is_err());
    }
}
