//! License policy variants and their bounds.

use serde::{Deserialize, Serialize};

use crate::error::OvsaError;

/// Upper bound on TimeLimit days (ten years).
pub const MAX_TIME_LIMIT_DAYS: u32 = 3650;
/// Upper bound on UsageCount.
pub const MAX_USAGE_COUNT: u32 = 1_000_000;

/// What a customer license permits. Exactly one variant is encoded per
/// license; the service decrements usage before checking expiry when a
/// deployment layers both through separate licenses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LicensePolicy {
    /// Valid for `days` days from the license creation date.
    TimeLimit {
        /// Days of validity, 1..=3650.
        days: u32,
    },
    /// Valid for `count` successful validations.
    UsageCount {
        /// Permitted validations, 1..=1_000_000.
        count: u32,
    },
    /// No time or usage restriction.
    Unlimited,
}

impl LicensePolicy {
    /// Check the variant-specific bounds.
    pub fn validate(&self) -> Result<(), OvsaError> {
        match self {
            Self::TimeLimit { days } => {
                if *days == 0 || *days > MAX_TIME_LIMIT_DAYS {
                    return Err(OvsaError::invalid(format!(
                        "time limit must be 1..={MAX_TIME_LIMIT_DAYS} days, got {days}"
                    )));
                }
            }
            Self::UsageCount { count } => {
                if *count == 0 || *count > MAX_USAGE_COUNT {
                    return Err(OvsaError::invalid(format!(
                        "usage count must be 1..={MAX_USAGE_COUNT}, got {count}"
                    )));
                }
            }
            Self::Unlimited => {}
        }
        Ok(())
    }

    /// The initial quota for the service row, if the variant has one.
    #[must_use]
    pub fn initial_quota(&self) -> Option<u32> {
        match self {
            Self::UsageCount { count } => Some(*count),
            _ => None,
        }
    }

    /// The expiry instant for the service row, if the variant has one.
    #[must_use]
    pub fn expiry_from(&self, creation: chrono::DateTime<chrono::Utc>) -> Option<i64> {
        match self {
            Self::TimeLimit { days } => {
                Some((creation + chrono::Duration::days(i64::from(*days))).timestamp())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        assert!(LicensePolicy::TimeLimit { days: 30 }.validate().is_ok());
        assert!(LicensePolicy::TimeLimit { days: 0 }.validate().is_err());
        assert!(LicensePolicy::TimeLimit { days: 3651 }.validate().is_err());
        assert!(LicensePolicy::UsageCount { count: 1 }.validate().is_ok());
        assert!(LicensePolicy::UsageCount { count: 0 }.validate().is_err());
        assert!(LicensePolicy::UsageCount { count: 1_000_001 }
            .validate()
            .is_err());
        assert!(LicensePolicy::Unlimited.validate().is_ok());
    }

    #[test]
    fn test_tagged_encoding() {
        let rendered = serde_json::to_string(&LicensePolicy::TimeLimit { days: 30 }).unwrap();
        assert_eq!(rendered, r#"{"type":"TimeLimit","days":30}"#);
        let rendered = serde_json::to_string(&LicensePolicy::Unlimited).unwrap();
        assert_eq!(rendered, r#"{"type":"Unlimited"}"#);
    }

    #[test]
    fn test_expiry_computation() {
        let creation = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let expiry = LicensePolicy::TimeLimit { days: 30 }
            .expiry_from(creation)
            .unwrap();
        assert_eq!(expiry - creation.timestamp(), 30 * 24 * 3600);
        assert!(LicensePolicy::Unlimited.expiry_from(creation).is_none());
    }
}
