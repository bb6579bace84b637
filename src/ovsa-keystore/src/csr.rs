//! Subject-name parsing and CSR / self-signed certificate generation.
//!
//! `keygen storekey` accepts an OpenSSL-style subject string
//! (`/C=IN/ST=KA/O=Intel/CN=localhost`) and emits, per keypair, a CSR for
//! the operator to take to their CA and a self-signed certificate so the
//! keystore is usable before `storecert`.

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

use crate::error::KeystoreError;

/// A parsed certificate subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectName {
    components: Vec<(DnType, String)>,
}

impl SubjectName {
    /// Parse an OpenSSL-style subject string.
    ///
    /// Recognized attributes: C, ST, L, O, OU, CN. Unknown attributes are
    /// rejected rather than silently dropped.
    pub fn parse(subject: &str) -> Result<Self, KeystoreError> {
        let mut components = Vec::new();
        for part in subject.split('/').filter(|p| !p.is_empty()) {
            let (attr, value) = part.split_once('=').ok_or_else(|| {
                KeystoreError::malformed(format!("subject component {part:?} is not ATTR=value"))
            })?;
            if value.is_empty() {
                return Err(KeystoreError::malformed(format!(
                    "subject component {attr} has empty value"
                )));
            }
            let dn_type = match attr {
                "C" => DnType::CountryName,
                "ST" => DnType::StateOrProvinceName,
                "L" => DnType::LocalityName,
                "O" => DnType::OrganizationName,
                "OU" => DnType::OrganizationalUnitName,
                "CN" => DnType::CommonName,
                other => {
                    return Err(KeystoreError::malformed(format!(
                        "unknown subject attribute {other}"
                    )))
                }
            };
            components.push((dn_type, value.to_string()));
        }
        if components.is_empty() {
            return Err(KeystoreError::malformed("subject string is empty"));
        }
        Ok(Self { components })
    }

    /// The common name, if present.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.components
            .iter()
            .find(|(t, _)| *t == DnType::CommonName)
            .map(|(_, v)| v.as_str())
    }

    fn distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        for (dn_type, value) in &self.components {
            dn.push(dn_type.clone(), value.clone());
        }
        dn
    }

    /// Render back to the OpenSSL-style form for the container metadata.
    #[must_use]
    pub fn to_openssl_string(&self) -> String {
        let mut out = String::new();
        for (dn_type, value) in &self.components {
            let attr = match dn_type {
                DnType::CountryName => "C",
                DnType::StateOrProvinceName => "ST",
                DnType::LocalityName => "L",
                DnType::OrganizationName => "O",
                DnType::OrganizationalUnitName => "OU",
                DnType::CommonName => "CN",
                _ => continue,
            };
            out.push('/');
            out.push_str(attr);
            out.push('=');
            out.push_str(value);
        }
        out
    }
}

/// CSR and self-signed certificate for a freshly generated keypair.
pub struct IssuedCredentials {
    /// PEM certificate signing request.
    pub csr_pem: String,
    /// PEM self-signed certificate for the same key.
    pub self_signed_pem: String,
}

/// Build a CSR and self-signed certificate for a PKCS#8 private key.
pub fn issue_credentials(
    pkcs8_der: &[u8],
    subject: &SubjectName,
) -> Result<IssuedCredentials, KeystoreError> {
    let key_pair = KeyPair::try_from(pkcs8_der)
        .map_err(|e| KeystoreError::malformed(format!("keypair rejected by issuer: {e}")))?;

    let san = subject
        .common_name()
        .map(|cn| vec![cn.to_string()])
        .unwrap_or_default();
    let mut params = CertificateParams::new(san)
        .map_err(|e| KeystoreError::malformed(format!("certificate params: {e}")))?;
    params.distinguished_name = subject.distinguished_name();

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| KeystoreError::malformed(format!("CSR generation: {e}")))?;
    let csr_pem = csr
        .pem()
        .map_err(|e| KeystoreError::malformed(format!("CSR encoding: {e}")))?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| KeystoreError::malformed(format!("self-signed certificate: {e}")))?;

    Ok(IssuedCredentials {
        csr_pem,
        self_signed_pem: cert.pem(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subject() {
        let subject = SubjectName::parse("/C=IN/CN=localhost").unwrap();
        assert_eq!(subject.common_name(), Some("localhost"));
        assert_eq!(subject.to_openssl_string(), "/C=IN/CN=localhost");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SubjectName::parse("").is_err());
        assert!(SubjectName::parse("/C").is_err());
        assert!(SubjectName::parse("/X=oops").is_err());
        assert!(SubjectName::parse("/CN=").is_err());
    }

    #[test]
    fn test_issue_credentials_for_p256_key() {
        use p256::elliptic_curve::rand_core::OsRng;
        use p256::pkcs8::EncodePrivateKey;

        let secret = p256::SecretKey::random(&mut OsRng);
        let pkcs8 = secret.to_pkcs8_der().unwrap();
        let subject = SubjectName::parse("/O=Intel/CN=localhost").unwrap();

        let creds = issue_credentials(pkcs8.as_bytes(), &subject).unwrap();
        assert!(creds.csr_pem.contains("CERTIFICATE REQUEST"));
        assert!(creds.self_signed_pem.contains("BEGIN CERTIFICATE"));

        // The self-signed certificate must carry the same public key.
        let from_cert = ovsa_crypto::public_key_from_cert(&creds.self_signed_pem).unwrap();
        let expected = secret.public_key().to_sec1_bytes().to_vec();
        assert_eq!(from_cert, expected);
    }
}
