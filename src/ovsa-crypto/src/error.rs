//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors that can occur in the crypto primitive layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A slot id was out of range, unallocated, or already cleared.
    #[error("Wrong key slot: {slot}")]
    WrongSlot {
        /// The offending slot id.
        slot: u32,
    },

    /// The slot table has no free slots left.
    #[error("Key slot table exhausted")]
    SlotExhausted,

    /// The material in a slot does not match the requested operation.
    #[error("Algorithm mismatch: {reason}")]
    AlgMismatch {
        /// What was expected versus found.
        reason: String,
    },

    /// A signature, MAC, or AEAD tag failed to verify.
    #[error("Verification failed: {reason}")]
    VerifyFailed {
        /// Which check failed.
        reason: String,
    },

    /// Certificate is outside its validity window.
    #[error("Certificate expired or not yet valid")]
    CertExpired,

    /// Certificate structure, chain, or key usage is invalid.
    #[error("Certificate invalid: {reason}")]
    CertInvalid {
        /// Reason the certificate was rejected.
        reason: String,
    },

    /// The OCSP responder reported the certificate revoked.
    #[error("Certificate revoked by OCSP responder")]
    OcspRevoked,

    /// The OCSP status could not be determined (fail closed).
    #[error("OCSP status unknown: {reason}")]
    OcspUnknown {
        /// Why the status could not be determined.
        reason: String,
    },

    /// Malformed or out-of-range input to a primitive.
    #[error("Invalid input: {reason}")]
    InvalidInput {
        /// What was wrong with the input.
        reason: String,
    },

    /// Failure inside an underlying cryptographic routine.
    #[error("Crypto primitive failure: {reason}")]
    PrimitiveFailure {
        /// Non-secret description of the failure.
        reason: String,
    },
}

impl CryptoError {
    /// Create a verification failure from a reason.
    #[must_use]
    pub fn verify(reason: impl Into<String>) -> Self {
        Self::VerifyFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid-input error from a reason.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Create a primitive failure from a reason.
    #[must_use]
    pub fn primitive(reason: impl Into<String>) -> Self {
        Self::PrimitiveFailure {
            reason: reason.into(),
        }
    }

    /// Create a certificate rejection from a reason.
    #[must_use]
    pub fn cert(reason: impl Into<String>) -> Self {
        Self::CertInvalid {
            reason: reason.into(),
        }
    }
}
