//! The license configuration produced by `licgen` and consumed by `sale`.

use serde::{Deserialize, Serialize};

use crate::envelope::SignedBlob;
use crate::error::OvsaError;
use crate::policy::LicensePolicy;
use crate::types::{ServerUrl, VersionTag};

/// The signed body of a license configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseConfigPayload {
    /// Human-readable name for this license offering.
    pub license_name: String,
    /// Version of the offering.
    pub license_version: String,
    /// Policy every license minted from this config carries.
    pub license_config: LicensePolicy,
    /// License-service endpoints in preference order (`host:port`).
    pub license_serv_urls: Vec<String>,
    /// Issuer certificate, PEM.
    pub isv_certificate: String,
}

/// A license configuration as stored on disk.
pub type LicenseConfig = SignedBlob<LicenseConfigPayload>;

impl LicenseConfigPayload {
    /// Validate the policy bounds and URL list.
    pub fn validate(&self) -> Result<(), OvsaError> {
        VersionTag::new(self.license_version.clone())?;
        self.license_config.validate()?;
        if self.license_serv_urls.is_empty() {
            return Err(OvsaError::invalid("license config has no server URL"));
        }
        for url in &self.license_serv_urls {
            ServerUrl::new(url.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_urls() {
        let payload = LicenseConfigPayload {
            license_name: "retail".into(),
            license_version: "1".into(),
            license_config: LicensePolicy::TimeLimit { days: 30 },
            license_serv_urls: vec![],
            isv_certificate: String::new(),
        };
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_sane_config() {
        let payload = LicenseConfigPayload {
            license_name: "retail".into(),
            license_version: "1".into(),
            license_config: LicensePolicy::UsageCount { count: 100 },
            license_serv_urls: vec!["license.example:4451".into()],
            isv_certificate: String::new(),
        };
        payload.validate().unwrap();
    }
}
