//! X.509 certificate parsing and verification.
//!
//! A certificate argument is always a PEM string and may carry the full chain
//! (leaf first). Verification checks structure, the validity window, the
//! signature of each certificate by its issuer, extended key usage for peer
//! certificates, and - when a trust store is configured - that the chain
//! terminates at a configured anchor. Peer verification additionally runs an
//! OCSP query against the responder named in the leaf's AIA extension.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::ParsedExtension;
use x509_parser::pem::Pem;
use x509_parser::prelude::FromDer;

use crate::error::CryptoError;
use crate::ocsp::{self, OcspOptions};

/// How to verify a certificate.
#[derive(Debug, Clone, Default)]
pub struct CertVerifyOptions {
    /// Peer certificate: enforce key-usage checks and query OCSP.
    pub peer: bool,
    /// Reject certificates outside their validity window.
    pub lifetime_check: bool,
    /// PEM trust anchors. Empty means self-signed roots are accepted, which
    /// is the state of a keystore before `storecert`.
    pub trust_anchors: Vec<String>,
    /// OCSP deadline and retry policy, used only when `peer` is set.
    pub ocsp: OcspOptions,
}

/// Decode every certificate in a PEM string into DER blocks, leaf first.
pub fn pem_chain_to_der(cert_pem: &str) -> Result<Vec<Vec<u8>>, CryptoError> {
    let mut chain = Vec::new();
    for pem in Pem::iter_from_buffer(cert_pem.as_bytes()) {
        let pem = pem.map_err(|e| CryptoError::cert(format!("PEM parse: {e}")))?;
        if pem.label != "CERTIFICATE" {
            return Err(CryptoError::cert(format!(
                "unexpected PEM block {}",
                pem.label
            )));
        }
        chain.push(pem.contents);
    }
    if chain.is_empty() {
        return Err(CryptoError::cert("no certificate in PEM input"));
    }
    Ok(chain)
}

/// Extract the leaf's SEC1 public key point from a PEM certificate.
///
/// For EC keys the subjectPublicKey BIT STRING content is the SEC1 point,
/// which is exactly what the wrap and signature primitives consume.
pub fn public_key_from_cert(cert_pem: &str) -> Result<Vec<u8>, CryptoError> {
    let chain = pem_chain_to_der(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&chain[0])
        .map_err(|e| CryptoError::cert(format!("X.509 parse: {e}")))?;
    let point = cert.public_key().subject_public_key.data.to_vec();
    match point.len() {
        65 | 97 => Ok(point),
        n => Err(CryptoError::cert(format!(
            "subject public key is not an EC point ({n} bytes)"
        ))),
    }
}

/// Verify a certificate (and its embedded chain) under `options`.
pub fn verify_certificate(cert_pem: &str, options: &CertVerifyOptions) -> Result<(), CryptoError> {
    let chain_der = pem_chain_to_der(cert_pem)?;
    let mut parsed = Vec::with_capacity(chain_der.len());
    for der in &chain_der {
        let (rest, cert) = X509Certificate::from_der(der)
            .map_err(|e| CryptoError::cert(format!("X.509 parse: {e}")))?;
        if !rest.is_empty() {
            return Err(CryptoError::cert("trailing bytes after certificate"));
        }
        parsed.push(cert);
    }

    if options.lifetime_check {
        let now = x509_parser::time::ASN1Time::now();
        for cert in &parsed {
            if !cert.validity().is_valid_at(now) {
                return Err(CryptoError::CertExpired);
            }
        }
    }

    // Each certificate must be signed by the next one in the chain; the last
    // must be self-signed or signed by a configured anchor.
    for window in parsed.windows(2) {
        window[0]
            .verify_signature(Some(window[1].public_key()))
            .map_err(|_| CryptoError::verify("certificate chain signature"))?;
    }
    let root = parsed.last().expect("chain is non-empty");
    if options.trust_anchors.is_empty() {
        root.verify_signature(None)
            .map_err(|_| CryptoError::verify("self-signed root signature"))?;
    } else {
        verify_against_anchors(root, &options.trust_anchors)?;
    }

    if options.peer {
        let leaf = &parsed[0];
        check_peer_key_usage(leaf)?;
        ocsp::check_peer_status(&chain_der, &options.ocsp)?;
    }

    Ok(())
}

/// Re-encode a DER certificate as PEM.
#[must_use]
pub fn der_to_pem(cert_der: &[u8]) -> String {
    use base64::Engine;

    let encoded = base64::engine::general_purpose::STANDARD.encode(cert_der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for chunk in encoded.as_bytes().chunks(64) {
        pem.push_str(std::str::from_utf8(chunk).expect("base64 is ASCII"));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

/// Subject and issuer distinguished names of a PEM certificate's leaf.
pub fn subject_and_issuer(cert_pem: &str) -> Result<(String, String), CryptoError> {
    let chain = pem_chain_to_der(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&chain[0])
        .map_err(|e| CryptoError::cert(format!("X.509 parse: {e}")))?;
    Ok((cert.subject().to_string(), cert.issuer().to_string()))
}

/// Compare two SPKI fingerprints in constant time.
#[must_use]
pub fn fingerprints_match(a: &str, b: &str) -> bool {
    let (Ok(a), Ok(b)) = (hex::decode(a), hex::decode(b)) else {
        return false;
    };
    a.len() == b.len() && bool::from(a.ct_eq(&b))
}

fn verify_against_anchors(
    root: &X509Certificate<'_>,
    anchors: &[String],
) -> Result<(), CryptoError> {
    for anchor_pem in anchors {
        let anchor_der = pem_chain_to_der(anchor_pem)?;
        let (_, anchor) = X509Certificate::from_der(&anchor_der[0])
            .map_err(|e| CryptoError::cert(format!("trust anchor parse: {e}")))?;
        // The root is either the anchor itself or directly issued by it.
        if crate::constant_time_eq(
            &Sha256::digest(root.public_key().raw),
            &Sha256::digest(anchor.public_key().raw),
        ) {
            return Ok(());
        }
        if root.verify_signature(Some(anchor.public_key())).is_ok() {
            return Ok(());
        }
    }
    Err(CryptoError::verify("chain does not reach a trust anchor"))
}

fn check_peer_key_usage(leaf: &X509Certificate<'_>) -> Result<(), CryptoError> {
    // EKU is only enforced when the extension is present; a certificate
    // without EKU is usable for any purpose per RFC 5280.
    for ext in leaf.extensions() {
        if let ParsedExtension::ExtendedKeyUsage(eku) = ext.parsed_extension() {
            if !(eku.client_auth || eku.server_auth || eku.any) {
                return Err(CryptoError::cert(
                    "peer certificate lacks client/server auth EKU",
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};

    fn self_signed(name: &str) -> (String, KeyPair) {
        let key = KeyPair::generate().unwrap();
        let params = CertificateParams::new(vec![name.to_string()]).unwrap();
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), key)
    }

    #[test]
    fn test_self_signed_verifies_without_anchors() {
        let (pem, _) = self_signed("localhost");
        let options = CertVerifyOptions {
            lifetime_check: true,
            ..Default::default()
        };
        verify_certificate(&pem, &options).unwrap();
    }

    #[test]
    fn test_garbage_pem_rejected() {
        assert!(public_key_from_cert("not a pem").is_err());
        assert!(verify_certificate("not a pem", &CertVerifyOptions::default()).is_err());
    }

    #[test]
    fn test_public_key_extraction() {
        let (pem, _) = self_signed("localhost");
        let point = public_key_from_cert(&pem).unwrap();
        assert_eq!(point[0], 0x04);
    }

    #[test]
    fn test_chain_to_anchor() {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let leaf_params = CertificateParams::new(vec!["leaf.example".into()]).unwrap();
        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &ca_cert, &ca_key)
            .unwrap();

        let chain_pem = format!("{}{}", leaf_cert.pem(), ca_cert.pem());
        let options = CertVerifyOptions {
            lifetime_check: true,
            trust_anchors: vec![ca_cert.pem()],
            ..Default::default()
        };
        verify_certificate(&chain_pem, &options).unwrap();

        // A different anchor must be rejected.
        let (other_anchor, _) = self_signed("other");
        let bad = CertVerifyOptions {
            lifetime_check: true,
            trust_anchors: vec![other_anchor],
            ..Default::default()
        };
        assert!(verify_certificate(&chain_pem, &bad).is_err());
    }

    #[test]
    fn test_fingerprint_comparison() {
        assert!(fingerprints_match("a1b2", "a1b2"));
        assert!(!fingerprints_match("a1b2", "a1b3"));
        assert!(!fingerprints_match("a1b2", "zz"));
    }
}
