//! TCB signatures and runtime quote matching.
//!
//! A TCB signature is the issuer's signed description of an acceptable
//! runtime measurement: which PCR bank, which PCR indices, and the digest
//! those PCRs must produce. The quote a runtime presents at validation time
//! is generated by out-of-scope TPM tooling; this module only checks that
//! the quote's measurement matches the signed reference and that the quote
//! signature chains to the attestation-key anchor provisioned into the
//! license service.

use base64::Engine;
use serde::{Deserialize, Serialize};

use ovsa_crypto::{to_canonical_bytes, verify_with_public_key, CryptoContext, SlotId};

use crate::envelope::SignedBlob;
use crate::error::OvsaError;

/// The signed body of a TCB signature file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcbPayload {
    /// Name of the trusted computing base description.
    pub tcb_name: String,
    /// Version of the description.
    pub tcb_version: String,
    /// Hash algorithm of the PCR bank, e.g. `sha256`.
    pub pcr_bank_algorithm: String,
    /// PCR indices included in the measurement.
    pub pcr_selection: Vec<u32>,
    /// Hex digest over the selected PCR values.
    pub pcr_digest: String,
    /// Issuer certificate, PEM.
    pub isv_certificate: String,
}

/// A TCB signature as stored on disk and inlined into customer licenses.
pub type TcbSignature = SignedBlob<TcbPayload>;

/// The measurement half of a quote, signed by the runtime's attestation key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteMeasurement {
    /// Hash algorithm of the quoted PCR bank.
    pub pcr_bank_algorithm: String,
    /// Quoted PCR indices.
    pub pcr_selection: Vec<u32>,
    /// Hex digest over the quoted PCR values.
    pub pcr_digest: String,
    /// Hex nonce binding the quote to this validation exchange.
    pub nonce: String,
}

/// A quote presented by a runtime during validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcbQuote {
    /// The quoted measurement.
    pub measurement: QuoteMeasurement,
    /// base64 DER ECDSA signature by the attestation key over the canonical
    /// measurement bytes.
    pub signature: String,
}

/// Reference measurement evidence fed to `gen-tcb-signature` by the TPM
/// tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcbEvidence {
    /// Hash algorithm of the PCR bank.
    pub pcr_bank_algorithm: String,
    /// Measured PCR indices.
    pub pcr_selection: Vec<u32>,
    /// Hex digest over the measured PCR values.
    pub pcr_digest: String,
}

/// Build and sign a TCB description from measurement evidence.
pub fn generate_tcb_signature(
    ctx: &CryptoContext,
    issuer_slot: SlotId,
    tcb_name: &str,
    tcb_version: &str,
    evidence: &TcbEvidence,
) -> Result<TcbSignature, OvsaError> {
    if evidence.pcr_selection.is_empty() {
        return Err(OvsaError::invalid("PCR selection is empty"));
    }
    if hex::decode(&evidence.pcr_digest).is_err() {
        return Err(OvsaError::invalid("PCR digest is not hex"));
    }
    let payload = TcbPayload {
        tcb_name: tcb_name.to_string(),
        tcb_version: tcb_version.to_string(),
        pcr_bank_algorithm: evidence.pcr_bank_algorithm.clone(),
        pcr_selection: evidence.pcr_selection.clone(),
        pcr_digest: evidence.pcr_digest.clone(),
        isv_certificate: ctx.certificate(issuer_slot)?,
    };
    Ok(SignedBlob::create(ctx, issuer_slot, payload)?)
}

/// Check a runtime quote against the signed reference measurement.
///
/// `ak_anchor_pem` is the attestation-key certificate provisioned into the
/// service out-of-band; `expected_nonce` binds the quote to the current
/// validation exchange.
pub fn verify_quote(
    quote: &TcbQuote,
    reference: &TcbPayload,
    ak_anchor_pem: &str,
    expected_nonce: &str,
) -> Result<(), OvsaError> {
    if quote.measurement.nonce != expected_nonce {
        return Err(OvsaError::verify("quote nonce does not match exchange"));
    }
    if quote.measurement.pcr_bank_algorithm != reference.pcr_bank_algorithm {
        return Err(OvsaError::verify("quote PCR bank algorithm mismatch"));
    }
    if quote.measurement.pcr_selection != reference.pcr_selection {
        return Err(OvsaError::verify("quote PCR selection mismatch"));
    }
    if !ovsa_crypto::constant_time_eq(
        quote.measurement.pcr_digest.as_bytes(),
        reference.pcr_digest.as_bytes(),
    ) {
        return Err(OvsaError::verify("quote PCR digest mismatch"));
    }

    let canonical = to_canonical_bytes(&quote.measurement)?;
    let signature = base64::engine::general_purpose::STANDARD
        .decode(&quote.signature)
        .map_err(|_| OvsaError::verify("quote signature is not base64"))?;
    let ak_public = ovsa_crypto::public_key_from_cert(ak_anchor_pem)?;
    verify_with_public_key(&ak_public, &canonical, &signature)
        .map_err(|_| OvsaError::verify("quote signature does not chain to AK anchor"))?;
    Ok(())
}

/// Sign a measurement with an attestation key slot. Test fixtures and the
/// runtime glue both produce quotes this way.
pub fn sign_quote(
    ctx: &CryptoContext,
    ak_slot: SlotId,
    measurement: QuoteMeasurement,
) -> Result<TcbQuote, OvsaError> {
    let canonical = to_canonical_bytes(&measurement)?;
    let signature = ctx.sign(ak_slot, &canonical)?;
    Ok(TcbQuote {
        measurement,
        signature: base64::engine::general_purpose::STANDARD.encode(signature),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence() -> TcbEvidence {
        TcbEvidence {
            pcr_bank_algorithm: "sha256".into(),
            pcr_selection: vec![0, 1, 2, 3, 7],
            pcr_digest: "ab".repeat(32),
        }
    }

    #[test]
    fn test_generate_rejects_bad_evidence() {
        let ctx = CryptoContext::new();
        let slot = ctx
            .generate_asymmetric_key(ovsa_crypto::EcdsaAlgorithm::P256)
            .unwrap();

        let empty = TcbEvidence {
            pcr_selection: vec![],
            ..evidence()
        };
        assert!(generate_tcb_signature(&ctx, slot, "tcb", "1", &empty).is_err());

        let bad_digest = TcbEvidence {
            pcr_digest: "not hex".into(),
            ..evidence()
        };
        assert!(generate_tcb_signature(&ctx, slot, "tcb", "1", &bad_digest).is_err());
    }

    #[test]
    fn test_quote_matching() {
        let reference = TcbPayload {
            tcb_name: "tcb".into(),
            tcb_version: "1".into(),
            pcr_bank_algorithm: "sha256".into(),
            pcr_selection: vec![0, 1, 2, 3, 7],
            pcr_digest: "ab".repeat(32),
            isv_certificate: String::new(),
        };

        // Attestation key with a self-signed anchor certificate.
        use p256::elliptic_curve::rand_core::OsRng;
        use p256::pkcs8::EncodePrivateKey;
        let ak_secret = p256::SecretKey::random(&mut OsRng);
        let subject = ovsa_keystore::SubjectName::parse("/CN=ak").unwrap();
        let anchor = ovsa_keystore::issue_credentials(
            ak_secret.to_pkcs8_der().unwrap().as_bytes(),
            &subject,
        )
        .unwrap()
        .self_signed_pem;

        let ctx = CryptoContext::new();
        let ak_slot = ctx
            .import_asymmetric_key(
                ovsa_crypto::EcdsaAlgorithm::P256,
                &ak_secret.to_bytes(),
                None,
            )
            .unwrap();

        let measurement = QuoteMeasurement {
            pcr_bank_algorithm: "sha256".into(),
            pcr_selection: vec![0, 1, 2, 3, 7],
            pcr_digest: "ab".repeat(32),
            nonce: "0011".into(),
        };
        let quote = sign_quote(&ctx, ak_slot, measurement).unwrap();
        verify_quote(&quote, &reference, &anchor, "0011").unwrap();

        // Wrong nonce: replayed quote.
        assert!(verify_quote(&quote, &reference, &anchor, "ffff").is_err());

        // Wrong digest: runtime measurement drifted.
        let mut drifted = quote.clone();
        drifted.measurement.pcr_digest = "cd".repeat(32);
        assert!(verify_quote(&drifted, &reference, &anchor, "0011").is_err());

        // Signature must chain to the anchor.
        let stranger = p256::SecretKey::random(&mut OsRng);
        let stranger_anchor = ovsa_keystore::issue_credentials(
            stranger.to_pkcs8_der().unwrap().as_bytes(),
            &subject,
        )
        .unwrap()
        .self_signed_pem;
        assert!(verify_quote(&quote, &reference, &stranger_anchor, "0011").is_err());
    }
}
