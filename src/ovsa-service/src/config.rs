//! Configuration for the license service.

use std::path::PathBuf;
use std::time::Duration;

use ovsa_crypto::OcspOptions;

/// Configuration for one service instance.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Listen address, `host:port`.
    pub listen_addr: String,
    /// PEM server certificate (the one pinned into customer licenses).
    pub server_cert_path: PathBuf,
    /// PEM PKCS#8 server private key.
    pub server_key_path: PathBuf,
    /// License store file.
    pub db_path: PathBuf,
    /// PEM attestation-key anchor provisioned out-of-band.
    pub ak_anchor_path: PathBuf,
    /// Per-request validation deadline.
    pub validate_timeout: Duration,
    /// TLS handshake deadline.
    pub handshake_timeout: Duration,
    /// OCSP policy for client certificates.
    pub ocsp: OcspOptions,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4451".into(),
            server_cert_path: "/opt/ovsa/certs/server.crt".into(),
            server_key_path: "/opt/ovsa/certs/server.key".into(),
            db_path: "/opt/ovsa/db/licenses.db".into(),
            ak_anchor_path: "/opt/ovsa/certs/ak_anchor.crt".into(),
            validate_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            ocsp: OcspOptions::default(),
        }
    }
}
