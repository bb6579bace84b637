//! The customer license: the bundle key re-wrapped to a named customer,
//! under a policy, bound to a TCB and a pinned license service.

use serde::{Deserialize, Serialize};

use crate::envelope::SignedBlob;
use crate::policy::LicensePolicy;
use crate::tcb::TcbSignature;

/// The signed body of a customer license.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerLicensePayload {
    /// License GUID copied from the master license.
    pub license_guid: String,
    /// Bundle GUID copied from the master license.
    pub model_guid: String,
    /// Bundle hash copied from the master license.
    pub model_hash: String,
    /// Issuer certificate, PEM.
    pub isv_certificate: String,
    /// Customer primary certificate, PEM.
    pub customer_certificate: String,
    /// SPKI fingerprint of the customer primary certificate.
    pub customer_primary_fingerprint: String,
    /// SPKI fingerprint of the customer secondary certificate, empty when
    /// the customer presented only the primary.
    pub customer_secondary_fingerprint: String,
    /// The policy this license grants.
    pub license_config: LicensePolicy,
    /// Pinned license-service endpoint, `host:port`.
    pub license_server_url: String,
    /// Pinned license-service certificate, PEM. The runtime accepts only a
    /// server whose SPKI matches this certificate.
    pub license_server_cert: String,
    /// The TCB signature this license is bound to, by value.
    pub tcb: TcbSignature,
    /// base64 wrap blob of the bundle key, wrapped to the customer primary
    /// public key.
    pub encryption_key: String,
    /// RFC 3339 UTC creation time.
    pub creation_date: String,
}

/// A customer license as stored on disk.
pub type CustomerLicense = SignedBlob<CustomerLicensePayload>;
