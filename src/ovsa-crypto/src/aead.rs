//! AES-256-GCM bulk encryption of in-memory buffers.
//!
//! Each encryption draws a fresh 96-bit nonce from the OS RNG; the 16-byte
//! authentication tag stays appended to the ciphertext, matching the
//! `enc_model` wire format.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand_core::{OsRng, RngCore};

use crate::error::CryptoError;
use crate::slot::{CryptoContext, SlotId, SlotMaterial, SYMMETRIC_KEY_SIZE};

/// AES-GCM nonce size in bytes (96 bits).
pub const GCM_IV_SIZE: usize = 12;
/// AES-GCM authentication tag size in bytes (128 bits).
pub const GCM_TAG_SIZE: usize = 16;

/// Output of an in-memory encryption.
#[derive(Debug, Clone)]
pub struct EncryptedBuffer {
    /// The random nonce used for this buffer.
    pub iv: [u8; GCM_IV_SIZE],
    /// Ciphertext with the 16-byte GCM tag appended.
    pub ciphertext: Vec<u8>,
}

impl CryptoContext {
    /// Allocate a fresh random symmetric key of `bits` length in a new slot.
    ///
    /// Only 256-bit keys are accepted; the parameter exists so that callers
    /// state the strength explicitly.
    pub fn generate_symmetric_key(&self, bits: usize) -> Result<SlotId, CryptoError> {
        if bits != SYMMETRIC_KEY_SIZE * 8 {
            return Err(CryptoError::invalid(format!(
                "unsupported symmetric key size {bits}"
            )));
        }
        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        let slot = self.import_symmetric_key(&key);
        key.iter_mut().for_each(|b| *b = 0);
        slot
    }

    /// Encrypt `plaintext` under the symmetric slot with a fresh nonce.
    pub fn encrypt_mem(
        &self,
        slot: SlotId,
        plaintext: &[u8],
    ) -> Result<EncryptedBuffer, CryptoError> {
        self.with_slot(slot, |material| {
            let SlotMaterial::Symmetric { key } = material else {
                return Err(CryptoError::AlgMismatch {
                    reason: "slot does not hold a symmetric key".into(),
                });
            };
            let cipher = Aes256Gcm::new_from_slice(key)
                .map_err(|e| CryptoError::primitive(e.to_string()))?;

            let mut iv = [0u8; GCM_IV_SIZE];
            OsRng.fill_bytes(&mut iv);

            let ciphertext = cipher
                .encrypt(Nonce::from_slice(&iv), plaintext)
                .map_err(|e| CryptoError::primitive(format!("AES-GCM encrypt: {e}")))?;

            Ok(EncryptedBuffer { iv, ciphertext })
        })
    }

    /// Decrypt a buffer produced by [`CryptoContext::encrypt_mem`].
    ///
    /// Fails with [`CryptoError::VerifyFailed`] when the tag does not
    /// authenticate; no plaintext is returned in that case.
    pub fn decrypt_mem(
        &self,
        slot: SlotId,
        iv: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if iv.len() != GCM_IV_SIZE {
            return Err(CryptoError::invalid(format!(
                "nonce must be {GCM_IV_SIZE} bytes, got {}",
                iv.len()
            )));
        }
        if ciphertext.len() < GCM_TAG_SIZE {
            return Err(CryptoError::invalid("ciphertext shorter than GCM tag"));
        }
        self.with_slot(slot, |material| {
            let SlotMaterial::Symmetric { key } = material else {
                return Err(CryptoError::AlgMismatch {
                    reason: "slot does not hold a symmetric key".into(),
                });
            };
            let cipher = Aes256Gcm::new_from_slice(key)
                .map_err(|e| CryptoError::primitive(e.to_string()))?;
            cipher
                .decrypt(Nonce::from_slice(iv), ciphertext)
                .map_err(|_| CryptoError::verify("AES-GCM tag mismatch"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let ctx = CryptoContext::new();
        let slot = ctx.generate_symmetric_key(256).unwrap();

        let enc = ctx.encrypt_mem(slot, b"model weights").unwrap();
        let plain = ctx.decrypt_mem(slot, &enc.iv, &enc.ciphertext).unwrap();
        assert_eq!(plain, b"model weights");
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let ctx = CryptoContext::new();
        let slot = ctx.generate_symmetric_key(256).unwrap();

        let a = ctx.encrypt_mem(slot, b"same input").unwrap();
        let b = ctx.encrypt_mem(slot, b"same input").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let ctx = CryptoContext::new();
        let slot = ctx.generate_symmetric_key(256).unwrap();

        let mut enc = ctx.encrypt_mem(slot, b"sensitive").unwrap();
        enc.ciphertext[0] ^= 0x01;
        assert!(matches!(
            ctx.decrypt_mem(slot, &enc.iv, &enc.ciphertext),
            Err(CryptoError::VerifyFailed { .. })
        ));
    }

    #[test]
    fn test_tampered_iv_rejected() {
        let ctx = CryptoContext::new();
        let slot = ctx.generate_symmetric_key(256).unwrap();

        let mut enc = ctx.encrypt_mem(slot, b"sensitive").unwrap();
        enc.iv[3] ^= 0x80;
        assert!(ctx.decrypt_mem(slot, &enc.iv, &enc.ciphertext).is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let ctx = CryptoContext::new();
        let a = ctx.generate_symmetric_key(256).unwrap();
        let b = ctx.generate_symmetric_key(256).unwrap();

        let enc = ctx.encrypt_mem(a, b"sensitive").unwrap();
        assert!(ctx.decrypt_mem(b, &enc.iv, &enc.ciphertext).is_err());
    }

    #[test]
    fn test_only_256_bit_keys() {
        let ctx = CryptoContext::new();
        assert!(ctx.generate_symmetric_key(128).is_err());
    }
}
