//! The runtime half of the validation protocol.
//!
//! Loads a bundle and its customer license, verifies everything locally,
//! runs the online validation against the pinned license service, and only
//! then unwraps the bundle key and streams decrypted model files to the
//! loader. Any failure - verification, policy, or plain network trouble -
//! refuses the load.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use ovsa_crypto::{CertVerifyOptions, CryptoContext, ProtocolKex};
use ovsa_keystore::{KeypairKind, Keystore};

use crate::bundle::ProtectedBundle;
use crate::customer::CustomerLicense;
use crate::error::OvsaError;
use crate::proto::{authorization_input, read_message, write_message, Message, PROTOCOL_VERSION};
use crate::tcb::TcbQuote;

/// Produces the runtime's TCB quote for a given exchange nonce. The real
/// implementation shells out to the platform's TPM tooling; tests sign with
/// a software attestation key.
pub trait QuoteProvider: Send + Sync {
    /// Produce a quote whose measurement embeds `nonce`.
    fn quote(&self, nonce: &str) -> Result<TcbQuote, OvsaError>;
}

/// Timeouts for the online exchange.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// TLS handshake deadline.
    pub handshake_timeout: Duration,
    /// Whole-validation deadline.
    pub validate_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            validate_timeout: Duration::from_secs(10),
        }
    }
}

/// Load a protected bundle: verify, validate online, decrypt.
///
/// Decrypted files are handed to `sink` in bundle order; the plaintext
/// buffer is zeroized after each call returns.
#[instrument(skip_all, fields(bundle = %bundle_path.display()))]
pub async fn load_and_decrypt(
    keystore: &Keystore,
    bundle_path: &std::path::Path,
    license_path: &std::path::Path,
    quotes: &dyn QuoteProvider,
    config: &ClientConfig,
    mut sink: impl FnMut(&str, &[u8]) -> Result<(), OvsaError>,
) -> Result<(), OvsaError> {
    let bundle = ProtectedBundle::read_from(bundle_path)?;
    let license = CustomerLicense::read_from(license_path)?;

    // Offline verification before anything touches the network.
    let chain_check = CertVerifyOptions {
        peer: false,
        lifetime_check: true,
        ..Default::default()
    };
    ovsa_crypto::verify_certificate(&license.payload.isv_certificate, &chain_check)?;
    license.verify(&license.payload.isv_certificate)?;
    ovsa_crypto::verify_certificate(&bundle.payload.isv_certificate, &chain_check)?;
    bundle.verify(&bundle.payload.isv_certificate)?;

    let bundle_hash = bundle.payload.model_hash()?;
    if bundle_hash != license.payload.model_hash {
        return Err(OvsaError::verify("bundle hash does not match license"));
    }
    if bundle.payload.model_guid != license.payload.model_guid {
        return Err(OvsaError::verify("bundle GUID does not match license"));
    }

    // This runtime must actually be the licensed customer.
    let ctx = CryptoContext::new();
    let keys = keystore.load(&ctx)?;
    let own_fingerprint = ovsa_crypto::spki_fingerprint(&ctx.certificate(keys.primary)?)?;
    if !ovsa_crypto::fingerprints_match(
        &own_fingerprint,
        &license.payload.customer_primary_fingerprint,
    ) {
        return Err(OvsaError::verify(
            "keystore identity does not match licensed customer",
        ));
    }
    debug!("local verification complete");

    // Online validation against the pinned service.
    tokio::time::timeout(
        config.validate_timeout,
        validate_online(keystore, &license, &bundle_hash, quotes, config),
    )
    .await
    .map_err(|_| OvsaError::transient("validation deadline elapsed"))??;
    info!("license service authorized the load");

    // Unwrap and decrypt, in input order.
    let wrapped = base64::engine::general_purpose::STANDARD
        .decode(&license.payload.encryption_key)
        .map_err(|_| OvsaError::verify("license key blob is not base64"))?;
    let (sym_slot, _hmac_slot) = ctx.unwrap_key(keys.primary, &wrapped)?;

    for entry in &bundle.payload.enc_model {
        let iv = base64::engine::general_purpose::STANDARD
            .decode(&entry.iv)
            .map_err(|_| OvsaError::verify(format!("{}: IV is not base64", entry.file_name)))?;
        let ciphertext = base64::engine::general_purpose::STANDARD
            .decode(&entry.ciphertext)
            .map_err(|_| {
                OvsaError::verify(format!("{}: ciphertext is not base64", entry.file_name))
            })?;
        let plaintext = Zeroizing::new(ctx.decrypt_mem(sym_slot, &iv, &ciphertext)?);
        sink(&entry.file_name, &plaintext)?;
        debug!(file = %entry.file_name, "model file decrypted");
    }
    Ok(())
    // ctx drops here; the bundle key and keystore slots are zeroized.
}

/// Run the wire protocol against the pinned endpoint. Returns once the
/// authorization token has been received and verified.
async fn validate_online(
    keystore: &Keystore,
    license: &CustomerLicense,
    bundle_hash: &str,
    quotes: &dyn QuoteProvider,
    config: &ClientConfig,
) -> Result<(), OvsaError> {
    let connector = pinned_connector(keystore, &license.payload.license_server_cert)?;

    let endpoint = &license.payload.license_server_url;
    let tcp = TcpStream::connect(endpoint)
        .await
        .map_err(|e| OvsaError::transient(format!("connect {endpoint}: {e}")))?;
    let host = endpoint
        .rsplit_once(':')
        .map_or(endpoint.as_str(), |(host, _)| host);
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| OvsaError::invalid(format!("bad server name {host}")))?;
    let mut stream = tokio::time::timeout(
        config.handshake_timeout,
        connector.connect(server_name, tcp),
    )
    .await
    .map_err(|_| OvsaError::transient("TLS handshake deadline elapsed"))?
    .map_err(|e| OvsaError::transient(format!("TLS handshake: {e}")))?;

    write_message(
        &mut stream,
        &Message::Hello {
            version: PROTOCOL_VERSION,
        },
    )
    .await?;
    match read_message(&mut stream).await? {
        Message::Hello { version } if version == PROTOCOL_VERSION => {}
        Message::Hello { version } => {
            return Err(OvsaError::invalid(format!(
                "service speaks protocol {version}, expected {PROTOCOL_VERSION}"
            )))
        }
        other => return Err(unexpected(other)),
    }

    let nonce_client = ovsa_crypto::random_nonce();
    let kex = ProtocolKex::new();
    let quote = quotes.quote(&nonce_client)?;
    write_message(
        &mut stream,
        &Message::Validate {
            license_guid: license.payload.license_guid.clone(),
            bundle_hash: bundle_hash.to_string(),
            nonce_client: nonce_client.clone(),
            kex_pubkey: base64::engine::general_purpose::STANDARD.encode(kex.public_key()),
            tcb_quote: quote,
        },
    )
    .await?;

    match read_message(&mut stream).await? {
        Message::Authorize {
            nonce_server,
            kex_pubkey,
            authorization,
        } => {
            let server_kex = base64::engine::general_purpose::STANDARD
                .decode(&kex_pubkey)
                .map_err(|_| OvsaError::verify("server kex key is not base64"))?;
            let shared = kex.agree(&server_kex)?;
            let expected = ovsa_crypto::hmac_sha256(
                &shared[..],
                &authorization_input(
                    &license.payload.license_guid,
                    &nonce_client,
                    &nonce_server,
                    bundle_hash,
                ),
            )?;
            if !ovsa_crypto::constant_time_eq(expected.as_bytes(), authorization.as_bytes()) {
                return Err(OvsaError::verify("authorization token mismatch"));
            }
            Ok(())
        }
        Message::Error { tag, message } => {
            warn!(%tag, %message, "service rejected validation");
            Err(service_error(&tag, message))
        }
        other => Err(unexpected(other)),
    }
}

fn unexpected(message: Message) -> OvsaError {
    OvsaError::invalid(format!("unexpected protocol message: {message:?}"))
}

/// Map a service error tag back into the local taxonomy so callers see the
/// same kinds on both sides of the wire.
fn service_error(tag: &str, message: String) -> OvsaError {
    use crate::error::PolicyViolation;

    match tag {
        "OVSA_ERR_POLICY_EXPIRED" => OvsaError::PolicyViolation(PolicyViolation::Expired),
        "OVSA_ERR_POLICY_EXHAUSTED" => OvsaError::PolicyViolation(PolicyViolation::Exhausted),
        "OVSA_ERR_POLICY_REVOKED" => OvsaError::PolicyViolation(PolicyViolation::Revoked),
        "OVSA_ERR_LICENSE_UNKNOWN" => OvsaError::PolicyViolation(PolicyViolation::Unknown),
        "OVSA_ERR_TRANSIENT" => OvsaError::transient(message),
        _ => OvsaError::verify(message),
    }
}

/// Build a TLS connector that pins the service SPKI and presents the
/// customer primary certificate.
fn pinned_connector(keystore: &Keystore, pinned_cert_pem: &str) -> Result<TlsConnector, OvsaError> {
    let pin = ovsa_crypto::spki_fingerprint(pinned_cert_pem)?;

    let (chain, key) = keystore.tls_identity(KeypairKind::Primary)?;
    let certs: Vec<CertificateDer<'static>> =
        chain.into_iter().map(CertificateDer::from).collect();
    let key = PrivateKeyDer::Pkcs8(key.to_vec().into());

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SpkiPinVerifier { pin }))
        .with_client_auth_cert(certs, key)
        .map_err(|e| OvsaError::invalid(format!("client TLS config: {e}")))?;
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Accepts exactly the server whose subject-public-key-info matches the
/// certificate pinned in the customer license.
#[derive(Debug)]
struct SpkiPinVerifier {
    pin: String,
}

impl ServerCertVerifier for SpkiPinVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let presented = ovsa_crypto::spki_fingerprint_der(end_entity.as_ref())
            .map_err(|e| rustls::Error::General(e.to_string()))?;
        if ovsa_crypto::fingerprints_match(&presented, &self.pin) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "server certificate does not match pinned SPKI".into(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
