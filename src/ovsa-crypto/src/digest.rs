//! Digest helpers: SHA-256, SHA-384, and certificate fingerprints.

use sha2::{Digest, Sha256, Sha384};

use crate::error::CryptoError;

/// SHA-384 over `data`, hex-encoded. This is the model-hash digest used to
/// bind bundles, master licenses, and customer licenses together.
#[must_use]
pub fn compute_hash(data: &[u8]) -> String {
    hex::encode(Sha384::digest(data))
}

/// SHA-256 over `data`, raw bytes.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 fingerprint over the DER of a certificate's
/// subject-public-key-info, hex-encoded.
///
/// This is the identity notion used for customer matching and server
/// certificate pinning: it survives certificate renewal as long as the key
/// does not change.
pub fn spki_fingerprint(cert_pem: &str) -> Result<String, CryptoError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes())
        .map_err(|e| CryptoError::cert(format!("PEM parse: {e}")))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| CryptoError::cert(format!("X.509 parse: {e}")))?;
    Ok(hex::encode(Sha256::digest(cert.public_key().raw)))
}

/// SPKI fingerprint of a DER-encoded certificate.
pub fn spki_fingerprint_der(cert_der: &[u8]) -> Result<String, CryptoError> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| CryptoError::cert(format!("X.509 parse: {e}")))?;
    Ok(hex::encode(Sha256::digest(cert.public_key().raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_is_sha384_hex() {
        let digest = compute_hash(b"abc");
        assert_eq!(digest.len(), 96);
        assert_eq!(
            digest,
            "cb00753f45a35e8bb5a03d699ac65007272c32ab0eded1631a8b605a43ff5bed\
             8086072ba1e7cc2358baeca134c825a7"
        );
    }

    #[test]
    fn test_fingerprint_stable_across_encodings() {
        let key = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec!["localhost".into()]).unwrap();
        let cert = params.self_signed(&key).unwrap();

        let from_pem = spki_fingerprint(&cert.pem()).unwrap();
        let from_der = spki_fingerprint_der(cert.der()).unwrap();
        assert_eq!(from_pem, from_der);
    }
}
