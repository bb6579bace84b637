//! The master license: issuer-internal record of a bundle's symmetric key.

use serde::{Deserialize, Serialize};

use crate::envelope::MacBlob;

/// The HMAC-protected body of a master license.
///
/// `encryption_key` is the bundle's symmetric key wrapped to the issuer's
/// own primary key, so `sale` can re-derive the key-encryption key and the
/// HMAC key from the issuer keystore alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterLicensePayload {
    /// Issuer-chosen license GUID.
    pub license_guid: String,
    /// GUID of the protected bundle this license covers.
    pub model_guid: String,
    /// Hex SHA-384 over the canonical bundle payload.
    pub model_hash: String,
    /// Issuer certificate, PEM.
    pub isv_certificate: String,
    /// base64 wrap blob (ephemeral key, AES-GCM IV and tag included).
    pub encryption_key: String,
    /// RFC 3339 UTC creation time.
    pub creation_date: String,
}

/// A master license as stored on disk.
pub type MasterLicense = MacBlob<MasterLicensePayload>;
