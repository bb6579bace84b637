//! Wrapping-key providers for private key material at rest.
//!
//! Every private key in a keystore file is AES-GCM-encrypted under a
//! wrapping key that never appears in the file. Where the wrapping key comes
//! from is platform policy: production customer keystores root it in the
//! TPM, developer and issuer machines fall back to a machine-bound software
//! derivation.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::KeystoreError;

/// Source of the at-rest wrapping key for one keystore file.
pub trait WrappingKeyProvider: Send + Sync {
    /// Derive the 32-byte wrapping key for the keystore named `name`.
    ///
    /// The name is mixed into the derivation so two keystores on the same
    /// machine never share a wrapping key.
    fn wrapping_key(&self, name: &str) -> Result<Zeroizing<[u8; 32]>, KeystoreError>;

    /// Short label recorded in the container so load can detect a provider
    /// mismatch early.
    fn label(&self) -> &'static str;
}

/// Software provider: binds the wrapping key to this machine's identity.
///
/// Reads `/etc/machine-id` (or the explicit secret handed to
/// [`SoftwareWrappingKey::with_secret`], which tests use) and expands it with
/// HKDF-SHA-256. An attacker with full filesystem access can recover this
/// key; deployments that need stronger binding configure the TPM-backed
/// provider of the host integration instead.
pub struct SoftwareWrappingKey {
    machine_secret: Zeroizing<Vec<u8>>,
}

impl SoftwareWrappingKey {
    /// Provider bound to the local machine identity.
    pub fn from_machine_id() -> Result<Self, KeystoreError> {
        let raw = std::fs::read("/etc/machine-id")
            .map_err(|e| KeystoreError::io("/etc/machine-id", e))?;
        Ok(Self {
            machine_secret: Zeroizing::new(raw),
        })
    }

    /// Provider bound to an explicit secret.
    #[must_use]
    pub fn with_secret(secret: &[u8]) -> Self {
        Self {
            machine_secret: Zeroizing::new(secret.to_vec()),
        }
    }
}

impl WrappingKeyProvider for SoftwareWrappingKey {
    fn wrapping_key(&self, name: &str) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
        let hk = Hkdf::<Sha256>::new(Some(b"keystore-wrap"), &self.machine_secret);
        let mut key = Zeroizing::new([0u8; 32]);
        hk.expand(name.as_bytes(), &mut key[..])
            .map_err(|e| KeystoreError::malformed(format!("HKDF expand: {e}")))?;
        Ok(key)
    }

    fn label(&self) -> &'static str {
        "software"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_differ_per_keystore_name() {
        let provider = SoftwareWrappingKey::with_secret(b"machine");
        let a = provider.wrapping_key("ks_a").unwrap();
        let b = provider.wrapping_key("ks_b").unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_keys_differ_per_machine() {
        let a = SoftwareWrappingKey::with_secret(b"machine-1")
            .wrapping_key("ks")
            .unwrap();
        let b = SoftwareWrappingKey::with_secret(b"machine-2")
            .wrapping_key("ks")
            .unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = SoftwareWrappingKey::with_secret(b"machine")
            .wrapping_key("ks")
            .unwrap();
        let b = SoftwareWrappingKey::with_secret(b"machine")
            .wrapping_key("ks")
            .unwrap();
        assert_eq!(*a, *b);
    }
}
