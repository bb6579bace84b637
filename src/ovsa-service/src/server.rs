//! The accept loop and per-connection protocol handler.
//!
//! One task per connection; handlers share the store read-side and meet only
//! at the usage-decrement UPDATE. No handler holds anything across a network
//! read except its own connection state. Closing the connection aborts the
//! handler; the store sees either the committed decrement or nothing.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, instrument, warn};

use ovsa_core::{read_message, write_message, Message, OvsaError, PROTOCOL_VERSION};
use ovsa_crypto::CertVerifyOptions;

use crate::config::ServiceConfig;
use crate::db::LicenseDb;
use crate::error::ServiceError;
use crate::validate::{ValidationRequest, Validator};

/// The license service daemon.
pub struct LicenseService {
    config: ServiceConfig,
    validator: Arc<Validator>,
    acceptor: TlsAcceptor,
}

impl LicenseService {
    /// Build a service from its configuration: open the store, load the TLS
    /// identity and the AK anchor.
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        let db = Arc::new(LicenseDb::open(&config.db_path)?);
        let ak_anchor = std::fs::read_to_string(&config.ak_anchor_path)
            .map_err(|e| OvsaError::io(config.ak_anchor_path.display().to_string(), e))?;
        let validator = Arc::new(Validator::new(db, ak_anchor));
        let acceptor = tls_acceptor(&config)?;
        Ok(Self {
            config,
            validator,
            acceptor,
        })
    }

    /// Bind the configured address and run the accept loop until the
    /// listener fails.
    pub async fn run(&self) -> Result<(), ServiceError> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Run the accept loop on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServiceError> {
        info!(addr = ?listener.local_addr(), "license service listening");

        loop {
            let (tcp, peer) = listener.accept().await?;
            let acceptor = self.acceptor.clone();
            let validator = Arc::clone(&self.validator);
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(tcp, acceptor, validator, config).await {
                    warn!(%peer, error = %e, "connection handler failed");
                }
            });
        }
    }
}

#[instrument(skip_all)]
async fn handle_connection(
    tcp: TcpStream,
    acceptor: TlsAcceptor,
    validator: Arc<Validator>,
    config: ServiceConfig,
) -> Result<(), ServiceError> {
    let mut stream = tokio::time::timeout(config.handshake_timeout, acceptor.accept(tcp))
        .await
        .map_err(|_| ServiceError::tls("handshake deadline elapsed"))?
        .map_err(|e| ServiceError::tls(e.to_string()))?;

    // The client certificate the handshake admitted; identity is decided
    // per-license against the store, not by a CA set.
    let client_cert_der = stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .map(|cert| cert.as_ref().to_vec())
        .ok_or_else(|| ServiceError::tls("client presented no certificate"))?;
    let client_fingerprint = ovsa_crypto::spki_fingerprint_der(&client_cert_der)?;

    match read_message(&mut stream).await? {
        Message::Hello { version } if version == PROTOCOL_VERSION => {}
        Message::Hello { version } => {
            let reply = error_message(&OvsaError::invalid(format!(
                "unsupported protocol version {version}"
            )));
            write_message(&mut stream, &reply).await?;
            return Ok(());
        }
        other => {
            debug!(?other, "protocol violation before Hello");
            return Err(ServiceError::Core(OvsaError::invalid(
                "expected Hello as first message",
            )));
        }
    }
    write_message(
        &mut stream,
        &Message::Hello {
            version: PROTOCOL_VERSION,
        },
    )
    .await?;

    let request = match read_message(&mut stream).await? {
        Message::Validate {
            license_guid,
            bundle_hash,
            nonce_client,
            kex_pubkey,
            tcb_quote,
        } => ValidationRequest {
            license_guid,
            bundle_hash,
            nonce_client,
            kex_pubkey,
            tcb_quote,
        },
        other => {
            debug!(?other, "protocol violation after Hello");
            return Err(ServiceError::Core(OvsaError::invalid(
                "expected Validate after Hello",
            )));
        }
    };

    let reply = tokio::time::timeout(
        config.validate_timeout,
        run_validation(validator, request, client_cert_der, client_fingerprint, config.clone()),
    )
    .await
    .unwrap_or_else(|_| {
        error_message(&OvsaError::transient("validation deadline elapsed"))
    });
    write_message(&mut stream, &reply).await?;
    Ok(())
}

/// Chain/OCSP-check the presented client certificate and run the validator.
/// The blocking OCSP query runs off the async worker threads.
async fn run_validation(
    validator: Arc<Validator>,
    request: ValidationRequest,
    client_cert_der: Vec<u8>,
    client_fingerprint: String,
    config: ServiceConfig,
) -> Message {
    let result = tokio::task::spawn_blocking(move || -> Result<_, ServiceError> {
        let client_pem = ovsa_crypto::der_to_pem(&client_cert_der);
        ovsa_crypto::verify_certificate(
            &client_pem,
            &CertVerifyOptions {
                peer: true,
                lifetime_check: true,
                trust_anchors: Vec::new(),
                ocsp: config.ocsp.clone(),
            },
        )?;
        validator.validate(&request, &client_fingerprint)
    })
    .await;

    match result {
        Ok(Ok(auth)) => Message::Authorize {
            nonce_server: auth.nonce_server,
            kex_pubkey: auth.kex_pubkey,
            authorization: auth.authorization,
        },
        Ok(Err(ServiceError::Core(err))) => {
            info!(tag = err.error_tag(), "validation rejected");
            error_message(&err)
        }
        Ok(Err(other)) => {
            error!(error = %other, "validation failed internally");
            error_message(&OvsaError::transient("internal service failure"))
        }
        Err(join_err) => {
            error!(error = %join_err, "validation task panicked");
            error_message(&OvsaError::transient("internal service failure"))
        }
    }
}

fn error_message(err: &OvsaError) -> Message {
    Message::Error {
        tag: err.error_tag().to_string(),
        message: err.to_string(),
    }
}

/// Build the mTLS acceptor: the service identity plus a verifier that
/// demands a client certificate without imposing a CA set.
fn tls_acceptor(config: &ServiceConfig) -> Result<TlsAcceptor, ServiceError> {
    let cert_file = std::fs::File::open(&config.server_cert_path)
        .map_err(|e| OvsaError::io(config.server_cert_path.display().to_string(), e))?;
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut std::io::BufReader::new(cert_file))
            .collect::<Result<_, _>>()
            .map_err(|e| ServiceError::tls(format!("server certificate: {e}")))?;

    let key_file = std::fs::File::open(&config.server_key_path)
        .map_err(|e| OvsaError::io(config.server_key_path.display().to_string(), e))?;
    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))
            .map_err(|e| ServiceError::tls(format!("server key: {e}")))?
            .ok_or_else(|| ServiceError::tls("no private key in server key file"))?;

    let server_config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(Arc::new(RequireAnyClientCert))
        .with_single_cert(certs, key)
        .map_err(|e| ServiceError::tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Demands a client certificate but defers identity to the per-license
/// fingerprint check; the store, not a CA list, says who may validate what.
#[derive(Debug)]
struct RequireAnyClientCert;

impl ClientCertVerifier for RequireAnyClientCert {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        // Parse structurally so garbage is refused during the handshake.
        ovsa_crypto::spki_fingerprint_der(end_entity.as_ref())
            .map_err(|e| rustls::Error::General(e.to_string()))?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
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
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
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
