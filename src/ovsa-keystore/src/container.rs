//! The versioned at-rest container format.
//!
//! A keystore named `ks` is a pair of sibling files `primary_ks` and
//! `secondary_ks`. Each file holds one JSON record: an integrity-protected
//! payload with the algorithm tag, the AES-GCM-encrypted private scalar, the
//! attached PEM certificate, and subject/issuer metadata. The HMAC is keyed
//! by the same wrapping key that encrypts the scalar, so a record only
//! verifies on the machine (or TPM) that created it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ovsa_crypto::EcdsaAlgorithm;

use crate::error::KeystoreError;

/// Container version understood by this build. Anything else is rejected.
pub const CONTAINER_VERSION: u32 = 1;

/// Which keypair a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeypairKind {
    /// The signing keypair used for all issued artifacts.
    Primary,
    /// The standby keypair, kept disjoint from the primary.
    Secondary,
}

impl KeypairKind {
    /// The file-name prefix for this kind.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Primary => "primary_",
            Self::Secondary => "secondary_",
        }
    }
}

/// The integrity-protected body of one keystore record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPayload {
    /// Container format version.
    pub version: u32,
    /// Primary or secondary.
    pub slot: KeypairKind,
    /// Curve of the stored keypair.
    pub algorithm: EcdsaAlgorithm,
    /// Label of the wrapping-key provider that sealed this record.
    pub provider: String,
    /// base64(GCM IV || encrypted private scalar + tag).
    pub private_key: String,
    /// PEM certificate currently attached to the keypair.
    pub certificate: String,
    /// Subject the keypair was created for, OpenSSL form.
    pub subject: String,
    /// Issuer of the attached certificate.
    pub issuer: String,
}

/// One keystore record as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// The protected body.
    pub payload: RecordPayload,
    /// Hex HMAC-SHA-256 over the canonical payload bytes.
    pub hmac: String,
}

/// Path of the record file for `kind` next to the keystore path.
pub fn record_path(keystore_path: &Path, kind: KeypairKind) -> PathBuf {
    let name = keystore_name(keystore_path);
    keystore_path.with_file_name(format!("{}{}", kind.prefix(), name))
}

/// Path of the CSR emitted for `kind`.
pub fn csr_path(keystore_path: &Path, kind: KeypairKind) -> PathBuf {
    let mut path = record_path(keystore_path, kind);
    path.set_file_name(format!(
        "{}.csr",
        path.file_name().expect("record path has a name").to_string_lossy()
    ));
    path
}

/// Path of the certificate file emitted for `kind`.
pub fn cert_path(keystore_path: &Path, kind: KeypairKind) -> PathBuf {
    let mut path = csr_path(keystore_path, kind);
    path.set_file_name(format!(
        "{}.crt",
        path.file_name().expect("csr path has a name").to_string_lossy()
    ));
    path
}

/// The bare keystore name used in wrapping-key derivation.
#[must_use]
pub fn keystore_name(keystore_path: &Path) -> String {
    keystore_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| keystore_path.to_string_lossy().into_owned())
}

/// Read and parse one record file.
pub fn read_record(path: &Path) -> Result<Record, KeystoreError> {
    let raw = std::fs::read(path).map_err(|e| KeystoreError::io(path.display().to_string(), e))?;
    let record: Record = serde_json::from_slice(&raw)
        .map_err(|e| KeystoreError::malformed(format!("record parse: {e}")))?;
    if record.payload.version != CONTAINER_VERSION {
        return Err(KeystoreError::UnknownVersion {
            version: record.payload.version,
        });
    }
    Ok(record)
}

/// Write one record file.
pub fn write_record(path: &Path, record: &Record) -> Result<(), KeystoreError> {
    let rendered = serde_json::to_vec_pretty(record)
        .map_err(|e| KeystoreError::malformed(format!("record render: {e}")))?;
    std::fs::write(path, rendered).map_err(|e| KeystoreError::io(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_paths() {
        let path = Path::new("/tmp/keys/ks");
        assert_eq!(
            record_path(path, KeypairKind::Primary),
            Path::new("/tmp/keys/primary_ks")
        );
        assert_eq!(
            csr_path(path, KeypairKind::Secondary),
            Path::new("/tmp/keys/secondary_ks.csr")
        );
        assert_eq!(
            cert_path(path, KeypairKind::Primary),
            Path::new("/tmp/keys/primary_ks.csr.crt")
        );
    }

    #[test]
    fn test_unknown_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record");
        let record = Record {
            payload: RecordPayload {
                version: 99,
                slot: KeypairKind::Primary,
                algorithm: EcdsaAlgorithm::P256,
                provider: "software".into(),
                private_key: String::new(),
                certificate: String::new(),
                subject: String::new(),
                issuer: String::new(),
            },
            hmac: String::new(),
        };
        write_record(&path, &record).unwrap();
        assert!(matches!(
            read_record(&path),
            Err(KeystoreError::UnknownVersion { version: 99 })
        ));
    }
}
