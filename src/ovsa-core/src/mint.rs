//! The sale pipeline: re-wrap a bundle key from the master license to a
//! customer and emit the signed customer license.

use std::path::PathBuf;

use base64::Engine;
use tracing::{debug, info, instrument};

use ovsa_crypto::{CertVerifyOptions, CryptoContext};
use ovsa_keystore::Keystore;

use crate::customer::{CustomerLicense, CustomerLicensePayload};
use crate::error::OvsaError;
use crate::license_config::LicenseConfig;
use crate::master::MasterLicense;
use crate::tcb::TcbSignature;
use crate::types::{creation_timestamp, Guid};

/// Inputs to one sale run.
#[derive(Debug, Clone)]
pub struct MintRequest {
    /// The master license produced by protect.
    pub master_license: PathBuf,
    /// The signed license configuration produced by licgen.
    pub license_config: PathBuf,
    /// The signed TCB description to bind the license to.
    pub tcb_signature: PathBuf,
    /// Customer primary certificate, PEM.
    pub customer_primary_cert: PathBuf,
    /// Customer secondary certificate, PEM, when the customer registered
    /// one.
    pub customer_secondary_cert: Option<PathBuf>,
    /// Certificate of the license service the runtime must pin.
    pub license_server_cert: PathBuf,
    /// Where to write the customer license.
    pub output: PathBuf,
}

/// Run the sale pipeline. Returns the license GUID carried over from the
/// master license.
#[instrument(skip_all, fields(master = %request.master_license.display()))]
pub fn mint(keystore: &Keystore, request: &MintRequest) -> Result<Guid, OvsaError> {
    let ctx = CryptoContext::new();

    let keys = keystore.load(&ctx)?;
    let issuer_certificate = ctx.certificate(keys.primary)?;
    let issuer_fingerprint = ovsa_crypto::spki_fingerprint(&issuer_certificate)?;

    // Master license: re-derive the KEK and HMAC key by unwrapping with the
    // issuer's own private key, then verify the HMAC before trusting any
    // field. A failed verify aborts and the context zeroizes everything.
    let master = MasterLicense::read_from(&request.master_license)?;
    let encryption_key = base64::engine::general_purpose::STANDARD
        .decode(&master.payload.encryption_key)
        .map_err(|_| OvsaError::verify("master license key blob is not base64"))?;
    let (sym_slot, hmac_slot) = ctx.unwrap_key(keys.primary, &encryption_key)?;
    master.verify(&ctx, hmac_slot)?;
    debug!("master license HMAC verified");

    // TCB signature: issuer-signed, and issued by the same issuer.
    let tcb = TcbSignature::read_from(&request.tcb_signature)?;
    tcb.verify(&tcb.payload.isv_certificate)?;
    if ovsa_crypto::spki_fingerprint(&tcb.payload.isv_certificate)? != issuer_fingerprint {
        return Err(OvsaError::verify("TCB signature is not from this issuer"));
    }

    // License configuration: issuer-signed, bounds-checked.
    let config = LicenseConfig::read_from(&request.license_config)?;
    config.verify(&config.payload.isv_certificate)?;
    if ovsa_crypto::spki_fingerprint(&config.payload.isv_certificate)? != issuer_fingerprint {
        return Err(OvsaError::verify("license config is not from this issuer"));
    }
    config.payload.validate()?;

    // Customer certificate: structural, chain, lifetime, and OCSP checks.
    let customer_certificate = read_text(&request.customer_primary_cert)?;
    ovsa_crypto::verify_certificate(
        &customer_certificate,
        &CertVerifyOptions {
            peer: true,
            lifetime_check: true,
            ..Default::default()
        },
    )?;
    let customer_primary_fingerprint = ovsa_crypto::spki_fingerprint(&customer_certificate)?;
    let customer_secondary_fingerprint = match &request.customer_secondary_cert {
        Some(path) => {
            let secondary = read_text(path)?;
            ovsa_crypto::verify_certificate(
                &secondary,
                &CertVerifyOptions {
                    peer: true,
                    lifetime_check: true,
                    ..Default::default()
                },
            )?;
            ovsa_crypto::spki_fingerprint(&secondary)?
        }
        None => String::new(),
    };
    debug!(fingerprint = %customer_primary_fingerprint, "customer certificate verified");

    // Re-wrap the bundle key to the customer.
    let customer_public = ovsa_crypto::public_key_from_cert(&customer_certificate)?;
    let wrapped = ctx.wrap_key(&customer_public, sym_slot)?;

    let license_server_cert = read_text(&request.license_server_cert)?;
    let license_guid = Guid::new(master.payload.license_guid.clone())?;
    let payload = CustomerLicensePayload {
        license_guid: license_guid.to_string(),
        model_guid: master.payload.model_guid.clone(),
        model_hash: master.payload.model_hash.clone(),
        isv_certificate: issuer_certificate,
        customer_certificate,
        customer_primary_fingerprint,
        customer_secondary_fingerprint,
        license_config: config.payload.license_config,
        license_server_url: config.payload.license_serv_urls[0].clone(),
        license_server_cert,
        tcb,
        encryption_key: base64::engine::general_purpose::STANDARD.encode(&wrapped.blob),
        creation_date: creation_timestamp(),
    };

    let license = CustomerLicense::create(&ctx, keys.primary, payload)?;
    license.write_to(&request.output)?;
    info!(path = %request.output.display(), %license_guid, "customer license written");

    Ok(license_guid)
    // ctx drops here; the unwrapped bundle key is zeroized.
}

fn read_text(path: &std::path::Path) -> Result<String, OvsaError> {
    std::fs::read_to_string(path).map_err(|e| OvsaError::io(path.display().to_string(), e))
}
