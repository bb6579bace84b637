//! The protect pipeline: encrypt model files, emit the signed bundle and the
//! master license.

use std::path::PathBuf;

use base64::Engine;
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

use ovsa_crypto::{CertVerifyOptions, CryptoContext};
use ovsa_keystore::Keystore;

use crate::bundle::{BundlePayload, EncryptedModelFile, ProtectedBundle};
use crate::envelope::MacBlob;
use crate::error::OvsaError;
use crate::master::MasterLicensePayload;
use crate::types::{creation_timestamp, Guid, InputFileName, ModelMetadata};

/// Inputs to one protect run.
#[derive(Debug, Clone)]
pub struct ProtectRequest {
    /// Model files to encrypt, in the order they should appear in the
    /// bundle.
    pub model_files: Vec<PathBuf>,
    /// Model identity.
    pub metadata: ModelMetadata,
    /// Issuer-chosen license GUID for the master license.
    pub license_guid: Guid,
    /// Where to write the protected bundle.
    pub protect_out: PathBuf,
    /// Where to write the master license.
    pub master_out: PathBuf,
}

/// What a successful protect run produced.
#[derive(Debug, Clone)]
pub struct ProtectOutcome {
    /// The freshly minted bundle GUID.
    pub model_guid: Guid,
    /// Hex SHA-384 over the canonical bundle payload.
    pub model_hash: String,
}

/// Run the protect pipeline.
///
/// All key slots allocated by the run live in a context scoped to this
/// function; they are zeroized on every exit path, success or failure.
#[instrument(skip_all, fields(model = %request.metadata.name, files = request.model_files.len()))]
pub fn protect(keystore: &Keystore, request: &ProtectRequest) -> Result<ProtectOutcome, OvsaError> {
    if request.model_files.is_empty() {
        return Err(OvsaError::invalid("no model files given"));
    }
    for path in &request.model_files {
        InputFileName::new(path.to_string_lossy().into_owned())?;
    }

    let ctx = CryptoContext::new();

    // Issuer keypair and certificate, verified before anything is encrypted.
    let keys = keystore.load(&ctx)?;
    let isv_certificate = ctx.certificate(keys.primary)?;
    ovsa_crypto::verify_certificate(
        &isv_certificate,
        &CertVerifyOptions {
            peer: false,
            lifetime_check: true,
            ..Default::default()
        },
    )?;
    debug!("issuer certificate verified");

    let sym_slot = ctx.generate_symmetric_key(256)?;

    let mut enc_model = Vec::with_capacity(request.model_files.len());
    for path in &request.model_files {
        let plaintext = Zeroizing::new(
            std::fs::read(path).map_err(|e| OvsaError::io(path.display().to_string(), e))?,
        );
        let enc = ctx.encrypt_mem(sym_slot, &plaintext)?;
        enc_model.push(EncryptedModelFile {
            file_name: path.to_string_lossy().into_owned(),
            iv: base64::engine::general_purpose::STANDARD.encode(enc.iv),
            ciphertext: base64::engine::general_purpose::STANDARD.encode(enc.ciphertext),
        });
        debug!(file = %path.display(), "model file encrypted");
    }

    let model_guid = Guid::generate();
    let payload = BundlePayload {
        model_name: request.metadata.name.to_string(),
        description: request.metadata.description.to_string(),
        version: request.metadata.version.to_string(),
        model_guid: model_guid.to_string(),
        isv_certificate: isv_certificate.clone(),
        enc_model,
    };
    let model_hash = payload.model_hash()?;

    let bundle = ProtectedBundle::create(&ctx, keys.primary, payload)?;
    bundle.write_to(&request.protect_out)?;
    info!(path = %request.protect_out.display(), %model_guid, "protected bundle written");

    // Master license: self-wrap the bundle key to the issuer so `sale` can
    // re-derive the KEK and HMAC key later.
    let issuer_public = ctx.public_key(keys.primary)?;
    let wrapped = ctx.wrap_key(&issuer_public, sym_slot)?;
    let master_payload = MasterLicensePayload {
        license_guid: request.license_guid.to_string(),
        model_guid: model_guid.to_string(),
        model_hash: model_hash.clone(),
        isv_certificate,
        encryption_key: base64::engine::general_purpose::STANDARD.encode(&wrapped.blob),
        creation_date: creation_timestamp(),
    };
    let master = MacBlob::create(&ctx, wrapped.hmac_slot, master_payload)?;
    master.write_to(&request.master_out)?;
    info!(path = %request.master_out.display(), "master license written");

    Ok(ProtectOutcome {
        model_guid,
        model_hash,
    })
    // ctx drops here; every slot the run allocated is zeroized.
}
