//! Validated newtypes for the fields that cross parse boundaries.
//!
//! Over-long or malformed strings are rejected where they enter the system;
//! downstream code only ever sees values that already satisfy the limits.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::OvsaError;

/// Maximum length of model names and descriptions.
pub const MAX_NAME_SIZE: usize = 256;
/// Maximum length of version strings.
pub const MAX_VERSION_SIZE: usize = 32;
/// Maximum length of input file paths.
pub const MAX_FILE_NAME: usize = 256;
/// Maximum length of license-server URLs.
pub const MAX_URL_SIZE: usize = 256;

macro_rules! bounded_string {
    ($(#[$doc:meta])* $name:ident, $limit:expr, $what:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a raw string.
            pub fn new(value: impl Into<String>) -> Result<Self, OvsaError> {
                let value = value.into();
                if value.is_empty() {
                    return Err(OvsaError::invalid(concat!($what, " is empty")));
                }
                if value.len() > $limit {
                    return Err(OvsaError::invalid(format!(
                        concat!($what, " exceeds {} bytes"),
                        $limit
                    )));
                }
                Ok(Self(value))
            }

            /// The validated string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value).map_err(|e| e.to_string())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

bounded_string!(
    /// A model name, at most [`MAX_NAME_SIZE`] bytes.
    ModelName,
    MAX_NAME_SIZE,
    "model name"
);

bounded_string!(
    /// A model description, at most [`MAX_NAME_SIZE`] bytes.
    ModelDescription,
    MAX_NAME_SIZE,
    "model description"
);

bounded_string!(
    /// A model or license version, at most [`MAX_VERSION_SIZE`] bytes.
    VersionTag,
    MAX_VERSION_SIZE,
    "version"
);

bounded_string!(
    /// An input file path, at most [`MAX_FILE_NAME`] bytes.
    InputFileName,
    MAX_FILE_NAME,
    "file name"
);

bounded_string!(
    /// A license-server endpoint, at most [`MAX_URL_SIZE`] bytes.
    ServerUrl,
    MAX_URL_SIZE,
    "license server URL"
);

/// A syntactically validated RFC 4122 UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Guid(String);

impl Guid {
    /// Validate and wrap a GUID string.
    pub fn new(value: impl Into<String>) -> Result<Self, OvsaError> {
        let value = value.into();
        if !ovsa_crypto::is_guid_valid(&value) {
            return Err(OvsaError::invalid(format!("{value:?} is not a valid GUID")));
        }
        Ok(Self(value))
    }

    /// Generate a fresh v4 GUID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ovsa_crypto::generate_guid())
    }

    /// The validated string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Guid {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value).map_err(|e| e.to_string())
    }
}

impl From<Guid> for String {
    fn from(value: Guid) -> Self {
        value.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Model identity supplied to the protect pipeline.
#[derive(Debug, Clone)]
pub struct ModelMetadata {
    /// Display name of the model.
    pub name: ModelName,
    /// Free-form description.
    pub description: ModelDescription,
    /// Version tag.
    pub version: VersionTag,
}

/// The current time in the RFC 3339 UTC form stamped on artifacts.
#[must_use]
pub fn creation_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_strings_reject_overlong() {
        assert!(ModelName::new("face detection").is_ok());
        assert!(ModelName::new("x".repeat(MAX_NAME_SIZE)).is_ok());
        assert!(ModelName::new("x".repeat(MAX_NAME_SIZE + 1)).is_err());
        assert!(ModelName::new("").is_err());
        assert!(VersionTag::new("x".repeat(MAX_VERSION_SIZE + 1)).is_err());
    }

    #[test]
    fn test_guid_validation() {
        assert!(Guid::new("50934a64-5d1b-4655-bcb4-80080fcb8858").is_ok());
        assert!(Guid::new("not-a-guid").is_err());
        assert!(ovsa_crypto::is_guid_valid(Guid::generate().as_str()));
    }

    #[test]
    fn test_serde_enforces_bounds() {
        let long = format!("\"{}\"", "x".repeat(MAX_VERSION_SIZE + 1));
        assert!(serde_json::from_str::<VersionTag>(&long).is_err());
        assert!(serde_json::from_str::<VersionTag>("\"0002\"").is_ok());
    }

    #[test]
    fn test_timestamp_is_rfc3339_utc() {
        let ts = creation_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
