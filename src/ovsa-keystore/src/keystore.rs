//! Keystore operations: create, attach certificates, load into key slots.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use tracing::{debug, info};
use zeroize::Zeroizing;

use ovsa_crypto::{
    public_key_from_cert, subject_and_issuer, to_canonical_bytes, CryptoContext, EcdsaAlgorithm,
    SlotId, GCM_IV_SIZE,
};

use crate::container::{
    cert_path, csr_path, keystore_name, read_record, record_path, write_record, KeypairKind,
    Record, RecordPayload, CONTAINER_VERSION,
};
use crate::csr::{issue_credentials, SubjectName};
use crate::error::KeystoreError;
use crate::wrapping::WrappingKeyProvider;

/// Handle to a keystore file pair on disk.
pub struct Keystore {
    path: PathBuf,
    provider: Arc<dyn WrappingKeyProvider>,
}

/// Slots produced by a successful load.
pub struct LoadedKeys {
    /// The primary keypair slot, certificate attached.
    pub primary: SlotId,
    /// The secondary keypair slot, certificate attached.
    pub secondary: SlotId,
}

/// Files written by [`Keystore::create`].
pub struct CreatedFiles {
    /// Record, CSR, and certificate paths in creation order.
    pub paths: Vec<PathBuf>,
}

impl Keystore {
    /// Open a keystore handle. No file access happens until an operation.
    pub fn new(path: impl Into<PathBuf>, provider: Arc<dyn WrappingKeyProvider>) -> Self {
        Self {
            path: path.into(),
            provider,
        }
    }

    /// Create primary and secondary keypairs with CSRs and self-signed
    /// certificates (`keygen storekey`).
    pub fn create(
        &self,
        algorithm: EcdsaAlgorithm,
        subject: &SubjectName,
    ) -> Result<CreatedFiles, KeystoreError> {
        let primary_path = record_path(&self.path, KeypairKind::Primary);
        if primary_path.exists() {
            return Err(KeystoreError::AlreadyExists {
                path: primary_path.display().to_string(),
            });
        }

        let mut created = Vec::new();
        for kind in [KeypairKind::Primary, KeypairKind::Secondary] {
            let (scalar, pkcs8) = generate_scalar(algorithm);
            let credentials = issue_credentials(&pkcs8, subject)?;

            let record = self.seal_record(
                kind,
                algorithm,
                &scalar,
                &credentials.self_signed_pem,
                subject,
            )?;

            let rec_path = record_path(&self.path, kind);
            write_record(&rec_path, &record)?;
            let csr_file = csr_path(&self.path, kind);
            std::fs::write(&csr_file, &credentials.csr_pem)
                .map_err(|e| KeystoreError::io(csr_file.display().to_string(), e))?;
            let cert_file = cert_path(&self.path, kind);
            std::fs::write(&cert_file, &credentials.self_signed_pem)
                .map_err(|e| KeystoreError::io(cert_file.display().to_string(), e))?;

            info!(kind = ?kind, path = %rec_path.display(), "keystore keypair created");
            created.extend([rec_path, csr_file, cert_file]);
        }
        Ok(CreatedFiles { paths: created })
    }

    /// Replace the certificate attached to one keypair (`keygen storecert`).
    ///
    /// The new certificate is accepted only if its subject-public-key-info
    /// matches the stored private key.
    pub fn attach_certificate(
        &self,
        kind: KeypairKind,
        cert_pem: &str,
    ) -> Result<(), KeystoreError> {
        let rec_path = record_path(&self.path, kind);
        let record = read_record(&rec_path)?;
        let payload = self.verify_record(&record, kind)?;

        let scalar = self.open_private_key(&payload)?;
        let stored_public = public_key_of_scalar(payload.algorithm, &scalar)?;

        let offered_public = public_key_from_cert(cert_pem)
            .map_err(|e| KeystoreError::BadCertificate {
                reason: e.to_string(),
            })?;
        if !ovsa_crypto::constant_time_eq(&stored_public, &offered_public) {
            return Err(KeystoreError::CertKeyMismatch);
        }

        let (subject, issuer) = subject_and_issuer(cert_pem).map_err(|e| {
            KeystoreError::BadCertificate {
                reason: e.to_string(),
            }
        })?;
        debug!(%subject, %issuer, "attaching externally signed certificate");

        let mut payload = payload;
        payload.certificate = cert_pem.to_string();
        payload.issuer = issuer;
        let record = self.finish_record(payload)?;
        write_record(&rec_path, &record)?;

        let cert_file = cert_path(&self.path, kind);
        std::fs::write(&cert_file, cert_pem)
            .map_err(|e| KeystoreError::io(cert_file.display().to_string(), e))?;
        Ok(())
    }

    /// Extract the certificate currently attached to one keypair.
    pub fn certificate(&self, kind: KeypairKind) -> Result<String, KeystoreError> {
        let record = read_record(&record_path(&self.path, kind))?;
        let payload = self.verify_record(&record, kind)?;
        Ok(payload.certificate)
    }

    /// Load both keypairs into slots (`load_asymmetric_key`).
    ///
    /// Fails if the secondary record is missing, if either integrity tag
    /// does not verify, or if either certificate no longer matches its
    /// private key.
    pub fn load(&self, ctx: &CryptoContext) -> Result<LoadedKeys, KeystoreError> {
        let secondary_path = record_path(&self.path, KeypairKind::Secondary);
        if !secondary_path.exists() {
            return Err(KeystoreError::MissingSecondary);
        }

        let primary = self.load_one(ctx, KeypairKind::Primary)?;
        let secondary = self.load_one(ctx, KeypairKind::Secondary)?;
        Ok(LoadedKeys { primary, secondary })
    }

    fn load_one(&self, ctx: &CryptoContext, kind: KeypairKind) -> Result<SlotId, KeystoreError> {
        let record = read_record(&record_path(&self.path, kind))?;
        let payload = self.verify_record(&record, kind)?;

        let scalar = self.open_private_key(&payload)?;
        let public = public_key_of_scalar(payload.algorithm, &scalar)?;
        let cert_public =
            public_key_from_cert(&payload.certificate).map_err(|e| KeystoreError::BadCertificate {
                reason: e.to_string(),
            })?;
        if !ovsa_crypto::constant_time_eq(&public, &cert_public) {
            return Err(KeystoreError::CertKeyMismatch);
        }

        let slot = ctx.import_asymmetric_key(
            payload.algorithm,
            &scalar,
            Some(payload.certificate.clone()),
        )?;
        debug!(kind = ?kind, slot = slot.index(), "keystore keypair loaded");
        Ok(slot)
    }

    /// Encrypt the scalar and finish the integrity tag for a new record.
    fn seal_record(
        &self,
        kind: KeypairKind,
        algorithm: EcdsaAlgorithm,
        scalar: &[u8],
        certificate: &str,
        subject: &SubjectName,
    ) -> Result<Record, KeystoreError> {
        let (_, issuer) =
            subject_and_issuer(certificate).map_err(|e| KeystoreError::BadCertificate {
                reason: e.to_string(),
            })?;

        let payload = RecordPayload {
            version: CONTAINER_VERSION,
            slot: kind,
            algorithm,
            provider: self.provider.label().to_string(),
            private_key: self.encrypt_private_key(scalar)?,
            certificate: certificate.to_string(),
            subject: subject.to_openssl_string(),
            issuer,
        };
        self.finish_record(payload)
    }

    fn finish_record(&self, payload: RecordPayload) -> Result<Record, KeystoreError> {
        let key = self.wrapping_key()?;
        let canonical = to_canonical_bytes(&payload)?;
        let hmac = ovsa_crypto::hmac_sha256(&key[..], &canonical)?;
        Ok(Record { payload, hmac })
    }

    /// Verify version, provider label, and integrity tag of a record.
    fn verify_record(
        &self,
        record: &Record,
        kind: KeypairKind,
    ) -> Result<RecordPayload, KeystoreError> {
        if record.payload.slot != kind {
            return Err(KeystoreError::malformed(format!(
                "record holds {:?}, expected {:?}",
                record.payload.slot, kind
            )));
        }
        if record.payload.provider != self.provider.label() {
            return Err(KeystoreError::malformed(format!(
                "record sealed by provider {:?}, loaded with {:?}",
                record.payload.provider,
                self.provider.label()
            )));
        }
        let key = self.wrapping_key()?;
        let canonical = to_canonical_bytes(&record.payload)?;
        let expected = ovsa_crypto::hmac_sha256(&key[..], &canonical)?;
        if !ovsa_crypto::constant_time_eq(expected.as_bytes(), record.hmac.as_bytes()) {
            return Err(KeystoreError::IntegrityFailed {
                entry: format!("{kind:?}"),
            });
        }
        Ok(record.payload.clone())
    }

    fn encrypt_private_key(&self, scalar: &[u8]) -> Result<String, KeystoreError> {
        let key = self.wrapping_key()?;
        let ctx = CryptoContext::new();
        let slot = ctx.import_symmetric_key(&key[..])?;
        let enc = ctx.encrypt_mem(slot, scalar)?;

        let mut blob = Vec::with_capacity(GCM_IV_SIZE + enc.ciphertext.len());
        blob.extend_from_slice(&enc.iv);
        blob.extend_from_slice(&enc.ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    fn open_private_key(
        &self,
        payload: &RecordPayload,
    ) -> Result<Zeroizing<Vec<u8>>, KeystoreError> {
        let blob = base64::engine::general_purpose::STANDARD
            .decode(&payload.private_key)
            .map_err(|e| KeystoreError::malformed(format!("private key decode: {e}")))?;
        if blob.len() <= GCM_IV_SIZE {
            return Err(KeystoreError::malformed("private key blob truncated"));
        }

        let key = self.wrapping_key()?;
        let ctx = CryptoContext::new();
        let slot = ctx.import_symmetric_key(&key[..])?;
        let scalar = ctx
            .decrypt_mem(slot, &blob[..GCM_IV_SIZE], &blob[GCM_IV_SIZE..])
            .map_err(|_| KeystoreError::IntegrityFailed {
                entry: format!("{:?}", payload.slot),
            })?;
        Ok(Zeroizing::new(scalar))
    }

    fn wrapping_key(&self) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
        self.provider.wrapping_key(&keystore_name(&self.path))
    }

    /// Export one keypair as TLS client/server identity material: the DER
    /// certificate chain and the PKCS#8 private key.
    ///
    /// This is the one path where a private key leaves the slot model - TLS
    /// stacks need the key in their own representation. Callers hand the
    /// result straight to the TLS configuration and drop it.
    pub fn tls_identity(
        &self,
        kind: KeypairKind,
    ) -> Result<(Vec<Vec<u8>>, Zeroizing<Vec<u8>>), KeystoreError> {
        let record = read_record(&record_path(&self.path, kind))?;
        let payload = self.verify_record(&record, kind)?;
        let scalar = self.open_private_key(&payload)?;

        let pkcs8 = pkcs8_of_scalar(payload.algorithm, &scalar)?;
        let chain = ovsa_crypto::pem_chain_to_der(&payload.certificate)
            .map_err(|e| KeystoreError::BadCertificate {
                reason: e.to_string(),
            })?;
        Ok((chain, pkcs8))
    }

    /// The keystore path this handle refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Generate a fresh scalar plus its PKCS#8 encoding for CSR issuance.
fn generate_scalar(algorithm: EcdsaAlgorithm) -> (Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>) {
    use p256::elliptic_curve::rand_core::OsRng;
    use p256::pkcs8::EncodePrivateKey;

    match algorithm {
        EcdsaAlgorithm::P256 => {
            let secret = p256::SecretKey::random(&mut OsRng);
            let pkcs8 = secret.to_pkcs8_der().expect("PKCS#8 encoding of fresh key");
            (
                Zeroizing::new(secret.to_bytes().to_vec()),
                Zeroizing::new(pkcs8.as_bytes().to_vec()),
            )
        }
        EcdsaAlgorithm::P384 => {
            let secret = p384::SecretKey::random(&mut OsRng);
            let pkcs8 = secret.to_pkcs8_der().expect("PKCS#8 encoding of fresh key");
            (
                Zeroizing::new(secret.to_bytes().to_vec()),
                Zeroizing::new(pkcs8.as_bytes().to_vec()),
            )
        }
    }
}

fn pkcs8_of_scalar(
    algorithm: EcdsaAlgorithm,
    scalar: &[u8],
) -> Result<Zeroizing<Vec<u8>>, KeystoreError> {
    use p256::pkcs8::EncodePrivateKey;

    match algorithm {
        EcdsaAlgorithm::P256 => {
            let secret = p256::SecretKey::from_slice(scalar)
                .map_err(|e| KeystoreError::malformed(format!("stored scalar invalid: {e}")))?;
            let pkcs8 = secret
                .to_pkcs8_der()
                .map_err(|e| KeystoreError::malformed(format!("PKCS#8 encoding: {e}")))?;
            Ok(Zeroizing::new(pkcs8.as_bytes().to_vec()))
        }
        EcdsaAlgorithm::P384 => {
            let secret = p384::SecretKey::from_slice(scalar)
                .map_err(|e| KeystoreError::malformed(format!("stored scalar invalid: {e}")))?;
            let pkcs8 = secret
                .to_pkcs8_der()
                .map_err(|e| KeystoreError::malformed(format!("PKCS#8 encoding: {e}")))?;
            Ok(Zeroizing::new(pkcs8.as_bytes().to_vec()))
        }
    }
}

fn public_key_of_scalar(
    algorithm: EcdsaAlgorithm,
    scalar: &[u8],
) -> Result<Vec<u8>, KeystoreError> {
    let ctx = CryptoContext::new();
    let slot = ctx.import_asymmetric_key(algorithm, scalar, None)?;
    Ok(ctx.public_key(slot)?)
}
