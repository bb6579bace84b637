//! Error types for the license service.

use thiserror::Error;

use ovsa_core::OvsaError;

/// Errors that can occur inside the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Database access failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A pipeline-level failure (verification, policy, I/O).
    #[error(transparent)]
    Core(#[from] OvsaError),

    /// TLS setup or handshake failure.
    #[error("TLS error: {reason}")]
    Tls {
        /// What went wrong.
        reason: String,
    },

    /// Listener or connection I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Create a TLS error from a reason.
    #[must_use]
    pub fn tls(reason: impl Into<String>) -> Self {
        Self::Tls {
            reason: reason.into(),
        }
    }
}

impl From<ovsa_crypto::CryptoError> for ServiceError {
    fn from(err: ovsa_crypto::CryptoError) -> Self {
        Self::Core(err.into())
    }
}
