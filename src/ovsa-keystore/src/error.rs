//! Error types for keystore operations.

use thiserror::Error;

/// Errors that can occur during keystore operations.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// Keystore file could not be read or written.
    #[error("Keystore I/O failed for {path}: {source}")]
    Io {
        /// The file involved.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The at-rest container is not valid JSON or misses fields.
    #[error("Keystore container malformed: {reason}")]
    Malformed {
        /// What was wrong.
        reason: String,
    },

    /// The container carries a version this build does not understand.
    #[error("Unknown keystore container version {version}")]
    UnknownVersion {
        /// The rejected version number.
        version: u32,
    },

    /// The integrity tag over a keystore record did not verify.
    #[error("Keystore integrity check failed for {entry}")]
    IntegrityFailed {
        /// Which entry failed.
        entry: String,
    },

    /// The secondary keypair is missing (dual-key invariant).
    #[error("Keystore is missing the secondary keypair")]
    MissingSecondary,

    /// A certificate offered to `storecert` does not match the stored key.
    #[error("Certificate public key does not match the stored private key")]
    CertKeyMismatch,

    /// A certificate failed structural checks.
    #[error("Certificate rejected: {reason}")]
    BadCertificate {
        /// Why the certificate was rejected.
        reason: String,
    },

    /// The requested keystore already exists and would be overwritten.
    #[error("Keystore already exists at {path}")]
    AlreadyExists {
        /// The path that exists.
        path: String,
    },

    /// Failure in the underlying crypto layer.
    #[error("Crypto error: {0}")]
    Crypto(#[from] ovsa_crypto::CryptoError),
}

impl KeystoreError {
    /// Create an I/O error for a path.
    #[must_use]
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a malformed-container error from a reason.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}
