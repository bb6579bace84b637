//! The toolchain-wide error taxonomy.
//!
//! Every user-visible failure maps to a stable short tag and a CLI exit
//! code. Verification and policy failures surface unchanged to the caller;
//! crypto primitive failures are logged (without secret material) and
//! surfaced; file I/O bubbles with the path attached.

use thiserror::Error;

use ovsa_crypto::CryptoError;
use ovsa_keystore::KeystoreError;

/// Why a license cannot authorize a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyViolation {
    /// TimeLimit policy: past expiry.
    Expired,
    /// UsageCount policy: quota consumed.
    Exhausted,
    /// License administratively revoked.
    Revoked,
    /// No such license in the service database.
    Unknown,
}

/// Errors surfaced by the protect, sale, and validation pipelines.
#[derive(Debug, Error)]
pub enum OvsaError {
    /// Malformed or out-of-range caller input.
    #[error("Invalid parameter: {reason}")]
    InvalidParameter {
        /// What was wrong.
        reason: String,
    },

    /// A file could not be opened, read, or written.
    #[error("File I/O failed for {path}: {source}")]
    FileIo {
        /// The file involved.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Non-semantic failure inside a cryptographic primitive.
    #[error("Crypto primitive failure: {reason}")]
    CryptoPrimitiveFailure {
        /// Non-secret description.
        reason: String,
    },

    /// A signature, HMAC, certificate chain, OCSP answer, TCB measurement,
    /// or hash comparison failed.
    #[error("Verification failed: {reason}")]
    VerificationFailed {
        /// Which check failed.
        reason: String,
    },

    /// The license policy forbids this load.
    #[error("Policy violation: {0:?}")]
    PolicyViolation(PolicyViolation),

    /// A deadline elapsed or a transient I/O failure occurred; the caller
    /// fails closed and may retry the whole operation.
    #[error("Transiently unavailable: {reason}")]
    TransientUnavailable {
        /// What timed out or dropped.
        reason: String,
    },
}

impl OvsaError {
    /// Create an invalid-parameter error from a reason.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            reason: reason.into(),
        }
    }

    /// Create a verification failure from a reason.
    #[must_use]
    pub fn verify(reason: impl Into<String>) -> Self {
        Self::VerificationFailed {
            reason: reason.into(),
        }
    }

    /// Create a file I/O error for a path.
    #[must_use]
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Create a transient-unavailability error from a reason.
    #[must_use]
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientUnavailable {
            reason: reason.into(),
        }
    }

    /// The stable short tag shown to users and logged by services.
    #[must_use]
    pub fn error_tag(&self) -> &'static str {
        match self {
            Self::InvalidParameter { .. } => "OVSA_ERR_INVALID_PARAMETER",
            Self::FileIo { .. } => "OVSA_ERR_FILE_IO",
            Self::CryptoPrimitiveFailure { .. } => "OVSA_ERR_CRYPTO",
            Self::VerificationFailed { .. } => "OVSA_ERR_VERIFY",
            Self::PolicyViolation(PolicyViolation::Expired) => "OVSA_ERR_POLICY_EXPIRED",
            Self::PolicyViolation(PolicyViolation::Exhausted) => "OVSA_ERR_POLICY_EXHAUSTED",
            Self::PolicyViolation(PolicyViolation::Revoked) => "OVSA_ERR_POLICY_REVOKED",
            Self::PolicyViolation(PolicyViolation::Unknown) => "OVSA_ERR_LICENSE_UNKNOWN",
            Self::TransientUnavailable { .. } => "OVSA_ERR_TRANSIENT",
        }
    }

    /// The process exit code for the CLI surface.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidParameter { .. } => 1,
            Self::FileIo { .. } | Self::TransientUnavailable { .. } => 2,
            Self::CryptoPrimitiveFailure { .. } => 3,
            Self::VerificationFailed { .. } => 4,
            Self::PolicyViolation(_) => 5,
        }
    }
}

impl From<CryptoError> for OvsaError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::VerifyFailed { reason } => Self::VerificationFailed { reason },
            CryptoError::CertExpired => Self::VerificationFailed {
                reason: "certificate expired or not yet valid".into(),
            },
            CryptoError::CertInvalid { reason } => Self::VerificationFailed {
                reason: format!("certificate invalid: {reason}"),
            },
            CryptoError::OcspRevoked => Self::VerificationFailed {
                reason: "certificate revoked by OCSP responder".into(),
            },
            CryptoError::OcspUnknown { reason } => Self::VerificationFailed {
                reason: format!("OCSP status unknown: {reason}"),
            },
            CryptoError::InvalidInput { reason } => Self::InvalidParameter { reason },
            other => Self::CryptoPrimitiveFailure {
                reason: other.to_string(),
            },
        }
    }
}

impl From<KeystoreError> for OvsaError {
    fn from(err: KeystoreError) -> Self {
        match err {
            KeystoreError::Io { path, source } => Self::FileIo { path, source },
            KeystoreError::IntegrityFailed { entry } => Self::VerificationFailed {
                reason: format!("keystore integrity failed for {entry}"),
            },
            KeystoreError::CertKeyMismatch => Self::VerificationFailed {
                reason: "certificate does not match stored private key".into(),
            },
            KeystoreError::Crypto(crypto) => crypto.into(),
            other => Self::InvalidParameter {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_cli_contract() {
        assert_eq!(OvsaError::invalid("x").exit_code(), 1);
        assert_eq!(
            OvsaError::io("f", std::io::Error::other("gone")).exit_code(),
            2
        );
        assert_eq!(
            OvsaError::CryptoPrimitiveFailure { reason: "x".into() }.exit_code(),
            3
        );
        assert_eq!(OvsaError::verify("x").exit_code(), 4);
        assert_eq!(
            OvsaError::PolicyViolation(PolicyViolation::Expired).exit_code(),
            5
        );
    }

    #[test]
    fn test_stable_tags() {
        assert_eq!(OvsaError::verify("sig").error_tag(), "OVSA_ERR_VERIFY");
        assert_eq!(
            OvsaError::PolicyViolation(PolicyViolation::Expired).error_tag(),
            "OVSA_ERR_POLICY_EXPIRED"
        );
        assert_eq!(
            OvsaError::PolicyViolation(PolicyViolation::Exhausted).error_tag(),
            "OVSA_ERR_POLICY_EXHAUSTED"
        );
    }

    #[test]
    fn test_crypto_error_mapping() {
        let err: OvsaError = CryptoError::verify("HMAC mismatch").into();
        assert!(matches!(err, OvsaError::VerificationFailed { .. }));

        let err: OvsaError = CryptoError::invalid("bad length").into();
        assert!(matches!(err, OvsaError::InvalidParameter { .. }));

        let err: OvsaError = CryptoError::SlotExhausted.into();
        assert!(matches!(err, OvsaError::CryptoPrimitiveFailure { .. }));
    }
}
