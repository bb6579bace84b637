//! The validation algorithm, independent of the wire.
//!
//! One call checks a single `Validate` request against the store: row
//! lookup, client identity, bundle hash, TCB quote, lifecycle state, and
//! policy. Usage-count consumption is the last step and the only one that
//! writes; every failure before it leaves the row untouched.

use std::sync::Arc;

use base64::Engine;
use tracing::{debug, instrument, warn};

use ovsa_core::{verify_quote, OvsaError, PolicyViolation, TcbQuote};
use ovsa_crypto::ProtocolKex;

use crate::db::{ConsumeOutcome, LicenseDb, LicenseStatus};
use crate::error::ServiceError;

/// One parsed validation request.
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    /// License under validation.
    pub license_guid: String,
    /// Bundle hash the runtime computed.
    pub bundle_hash: String,
    /// Client nonce, also bound into the quote.
    pub nonce_client: String,
    /// base64 client ephemeral key.
    pub kex_pubkey: String,
    /// The runtime's quote.
    pub tcb_quote: TcbQuote,
}

/// A granted authorization, ready to serialize into `Authorize`.
#[derive(Debug, Clone)]
pub struct Authorization {
    /// Hex server nonce.
    pub nonce_server: String,
    /// base64 server ephemeral key.
    pub kex_pubkey: String,
    /// Hex HMAC authorization token.
    pub authorization: String,
}

/// Checks requests against the store and the provisioned TPM anchor.
pub struct Validator {
    db: Arc<LicenseDb>,
    /// Attestation-key certificate provisioned out-of-band.
    ak_anchor_pem: String,
}

impl Validator {
    /// Create a validator over a store and AK anchor.
    pub fn new(db: Arc<LicenseDb>, ak_anchor_pem: String) -> Self {
        Self { db, ak_anchor_pem }
    }

    /// Run the full validation algorithm for one request.
    ///
    /// `client_fingerprint` is the SPKI fingerprint of the mTLS client
    /// certificate the connection presented.
    #[instrument(skip_all, fields(license_guid = %request.license_guid))]
    pub fn validate(
        &self,
        request: &ValidationRequest,
        client_fingerprint: &str,
    ) -> Result<Authorization, ServiceError> {
        let record = self
            .db
            .lookup(&request.license_guid)?
            .ok_or(OvsaError::PolicyViolation(PolicyViolation::Unknown))?;

        if !ovsa_crypto::fingerprints_match(
            client_fingerprint,
            &record.customer_primary_fingerprint,
        ) {
            warn!("client certificate does not match licensed customer");
            return Err(OvsaError::verify("client certificate fingerprint mismatch").into());
        }

        if !ovsa_crypto::constant_time_eq(
            request.bundle_hash.as_bytes(),
            record.model_hash.as_bytes(),
        ) {
            return Err(OvsaError::verify("bundle hash does not match license").into());
        }

        verify_quote(
            &request.tcb_quote,
            &record.tcb.payload,
            &self.ak_anchor_pem,
            &request.nonce_client,
        )?;
        debug!("TCB quote matches bound reference");

        match record.status {
            LicenseStatus::Active => {}
            LicenseStatus::Exhausted => {
                return Err(OvsaError::PolicyViolation(PolicyViolation::Exhausted).into())
            }
            LicenseStatus::Expired => {
                return Err(OvsaError::PolicyViolation(PolicyViolation::Expired).into())
            }
            LicenseStatus::Revoked => {
                return Err(OvsaError::PolicyViolation(PolicyViolation::Revoked).into())
            }
        }

        // Wall clock for policy expiry.
        if let Some(expiry) = record.expiry_timestamp {
            if chrono::Utc::now().timestamp() > expiry {
                return Err(OvsaError::PolicyViolation(PolicyViolation::Expired).into());
            }
        }

        // The one mutating step, last: consume quota if the policy counts.
        if record.remaining_quota.is_some() {
            match self.db.consume_usage(&request.license_guid)? {
                ConsumeOutcome::Consumed { now_exhausted } => {
                    if now_exhausted {
                        debug!("quota drained by this validation");
                    }
                }
                ConsumeOutcome::Denied => {
                    return Err(OvsaError::PolicyViolation(PolicyViolation::Exhausted).into())
                }
            }
        }

        self.authorize(request)
    }

    /// Complete the ECDH exchange and mint the authorization token.
    fn authorize(&self, request: &ValidationRequest) -> Result<Authorization, ServiceError> {
        let client_kex = base64::engine::general_purpose::STANDARD
            .decode(&request.kex_pubkey)
            .map_err(|_| OvsaError::invalid("client kex key is not base64"))?;

        let kex = ProtocolKex::new();
        let kex_public = kex.public_key();
        let shared = kex.agree(&client_kex)?;

        let nonce_server = ovsa_crypto::random_nonce();
        let authorization = ovsa_crypto::hmac_sha256(
            &shared[..],
            &ovsa_core::authorization_input(
                &request.license_guid,
                &request.nonce_client,
                &nonce_server,
                &request.bundle_hash,
            ),
        )?;
        Ok(Authorization {
            nonce_server,
            kex_pubkey: base64::engine::general_purpose::STANDARD.encode(kex_public),
            authorization,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    use ovsa_core::{
        sign_quote, QuoteMeasurement, SignedBlob, TcbEvidence,
    };
    use ovsa_crypto::{CryptoContext, EcdsaAlgorithm};
    use ovsa_keystore::{Keystore, SoftwareWrappingKey, SubjectName};

    struct Setup {
        _dir: tempfile::TempDir,
        validator: Validator,
        db: StdArc<LicenseDb>,
        license_guid: String,
        model_hash: String,
        customer_fingerprint: String,
        ak_ctx: CryptoContext,
        ak_slot: ovsa_crypto::SlotId,
    }

    fn setup(policy: ovsa_core::LicensePolicy, creation_date: Option<String>) -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let ks = Keystore::new(
            dir.path().join("ks"),
            StdArc::new(SoftwareWrappingKey::with_secret(b"issuer")),
        );
        ks.create(EcdsaAlgorithm::P256, &SubjectName::parse("/CN=issuer").unwrap())
            .unwrap();

        let ctx = CryptoContext::new();
        let keys = ks.load(&ctx).unwrap();
        let cert = ctx.certificate(keys.primary).unwrap();

        // Attestation key doubles as its own anchor certificate.
        let ak_ks = Keystore::new(
            dir.path().join("ak"),
            StdArc::new(SoftwareWrappingKey::with_secret(b"runtime")),
        );
        ak_ks
            .create(EcdsaAlgorithm::P256, &SubjectName::parse("/CN=ak").unwrap())
            .unwrap();
        let ak_ctx = CryptoContext::new();
        let ak_keys = ak_ks.load(&ak_ctx).unwrap();
        let ak_anchor = ak_ctx.certificate(ak_keys.primary).unwrap();

        let tcb = ovsa_core::generate_tcb_signature(
            &ctx,
            keys.primary,
            "tcb",
            "1",
            &TcbEvidence {
                pcr_bank_algorithm: "sha256".into(),
                pcr_selection: vec![0, 7],
                pcr_digest: "ab".repeat(32),
            },
        )
        .unwrap();

        let model_hash = "cd".repeat(48);
        let payload = ovsa_core::CustomerLicensePayload {
            license_guid: ovsa_crypto::generate_guid(),
            model_guid: ovsa_crypto::generate_guid(),
            model_hash: model_hash.clone(),
            isv_certificate: cert.clone(),
            customer_certificate: cert.clone(),
            customer_primary_fingerprint: ovsa_crypto::spki_fingerprint(&cert).unwrap(),
            customer_secondary_fingerprint: String::new(),
            license_config: policy,
            license_server_url: "localhost:4451".into(),
            license_server_cert: cert.clone(),
            tcb,
            encryption_key: "AAAA".into(),
            creation_date: creation_date.unwrap_or_else(ovsa_core::creation_timestamp),
        };
        let customer_fingerprint = payload.customer_primary_fingerprint.clone();
        let license_guid = payload.license_guid.clone();
        let license = SignedBlob::create(&ctx, keys.primary, payload).unwrap();

        let db = StdArc::new(LicenseDb::open_in_memory().unwrap());
        db.ingest(&license).unwrap();

        Setup {
            _dir: dir,
            validator: Validator::new(StdArc::clone(&db), ak_anchor),
            db,
            license_guid,
            model_hash,
            customer_fingerprint,
            ak_ctx,
            ak_slot: ak_keys.primary,
        }
    }

    fn request(setup: &Setup, nonce: &str) -> ValidationRequest {
        let quote = sign_quote(
            &setup.ak_ctx,
            setup.ak_slot,
            QuoteMeasurement {
                pcr_bank_algorithm: "sha256".into(),
                pcr_selection: vec![0, 7],
                pcr_digest: "ab".repeat(32),
                nonce: nonce.into(),
            },
        )
        .unwrap();

        let kex = ProtocolKex::new();
        ValidationRequest {
            license_guid: setup.license_guid.clone(),
            bundle_hash: setup.model_hash.clone(),
            nonce_client: nonce.into(),
            kex_pubkey: base64::engine::general_purpose::STANDARD.encode(kex.public_key()),
            tcb_quote: quote,
        }
    }

    fn policy_violation(err: ServiceError) -> PolicyViolation {
        match err {
            ServiceError::Core(OvsaError::PolicyViolation(v)) => v,
            other => panic!("expected policy violation, got {other:?}"),
        }
    }

    #[test]
    fn test_happy_path_authorizes() {
        let s = setup(ovsa_core::LicensePolicy::Unlimited, None);
        let auth = s
            .validator
            .validate(&request(&s, "0011"), &s.customer_fingerprint)
            .unwrap();
        assert_eq!(auth.authorization.len(), 64);
    }

    #[test]
    fn test_unknown_license_rejected() {
        let s = setup(ovsa_core::LicensePolicy::Unlimited, None);
        let mut req = request(&s, "0011");
        req.license_guid = ovsa_crypto::generate_guid();
        assert_eq!(
            policy_violation(
                s.validator
                    .validate(&req, &s.customer_fingerprint)
                    .unwrap_err()
            ),
            PolicyViolation::Unknown
        );
    }

    #[test]
    fn test_wrong_client_fingerprint_rejected() {
        let s = setup(ovsa_core::LicensePolicy::Unlimited, None);
        let err = s
            .validator
            .validate(&request(&s, "0011"), &"00".repeat(32))
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(OvsaError::VerificationFailed { .. })
        ));
    }

    #[test]
    fn test_wrong_bundle_hash_rejected_without_mutation() {
        let s = setup(ovsa_core::LicensePolicy::UsageCount { count: 3 }, None);
        let mut req = request(&s, "0011");
        req.bundle_hash = "00".repeat(48);
        assert!(s
            .validator
            .validate(&req, &s.customer_fingerprint)
            .is_err());

        // The failed validation consumed nothing.
        let record = s.db.lookup(&s.license_guid).unwrap().unwrap();
        assert_eq!(record.remaining_quota, Some(3));
    }

    #[test]
    fn test_drifted_quote_rejected() {
        let s = setup(ovsa_core::LicensePolicy::Unlimited, None);
        let mut req = request(&s, "0011");
        req.tcb_quote.measurement.pcr_digest = "ef".repeat(32);
        // Re-signing with the AK keeps the signature valid, so the digest
        // comparison itself must reject.
        req.tcb_quote = sign_quote(&s.ak_ctx, s.ak_slot, req.tcb_quote.measurement.clone()).unwrap();
        assert!(s
            .validator
            .validate(&req, &s.customer_fingerprint)
            .is_err());
    }

    #[test]
    fn test_usage_count_exhaustion_sequence() {
        let s = setup(ovsa_core::LicensePolicy::UsageCount { count: 2 }, None);
        s.validator
            .validate(&request(&s, "01"), &s.customer_fingerprint)
            .unwrap();
        s.validator
            .validate(&request(&s, "02"), &s.customer_fingerprint)
            .unwrap();
        assert_eq!(
            policy_violation(
                s.validator
                    .validate(&request(&s, "03"), &s.customer_fingerprint)
                    .unwrap_err()
            ),
            PolicyViolation::Exhausted
        );

        let record = s.db.lookup(&s.license_guid).unwrap().unwrap();
        assert_eq!(record.remaining_quota, Some(0));
        assert_eq!(record.status, LicenseStatus::Exhausted);
    }

    #[test]
    fn test_expired_license_rejected_without_mutation() {
        let s = setup(
            ovsa_core::LicensePolicy::TimeLimit { days: 30 },
            Some("2020-01-01T00:00:00Z".into()),
        );
        assert_eq!(
            policy_violation(
                s.validator
                    .validate(&request(&s, "0011"), &s.customer_fingerprint)
                    .unwrap_err()
            ),
            PolicyViolation::Expired
        );
    }

    #[test]
    fn test_revoked_license_rejected() {
        let s = setup(ovsa_core::LicensePolicy::Unlimited, None);
        s.db.revoke(&s.license_guid).unwrap();
        assert_eq!(
            policy_violation(
                s.validator
                    .validate(&request(&s, "0011"), &s.customer_fingerprint)
                    .unwrap_err()
            ),
            PolicyViolation::Revoked
        );
    }

    #[test]
    fn test_authorization_verifies_on_client_side() {
        let s = setup(ovsa_core::LicensePolicy::Unlimited, None);

        let client_kex = ProtocolKex::new();
        let mut req = request(&s, "0011");
        req.kex_pubkey =
            base64::engine::general_purpose::STANDARD.encode(client_kex.public_key());

        let auth = s
            .validator
            .validate(&req, &s.customer_fingerprint)
            .unwrap();

        let server_pub = base64::engine::general_purpose::STANDARD
            .decode(&auth.kex_pubkey)
            .unwrap();
        let shared = client_kex.agree(&server_pub).unwrap();
        let expected = ovsa_crypto::hmac_sha256(
            &shared[..],
            &ovsa_core::authorization_input(
                &req.license_guid,
                &req.nonce_client,
                &auth.nonce_server,
                &req.bundle_hash,
            ),
        )
        .unwrap();
        assert_eq!(expected, auth.authorization);
    }
}
