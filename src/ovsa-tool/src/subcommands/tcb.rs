//! `gen-tcb-signature`: sign a TCB description from measurement evidence.

use std::path::PathBuf;

use clap::Args;

use ovsa_core::{generate_tcb_signature, OvsaError, TcbEvidence};
use ovsa_crypto::CryptoContext;

use super::open_keystore;

/// Arguments for TCB signature generation.
#[derive(Args)]
pub struct TcbArgs {
    /// TCB description name
    #[arg(short = 'n', long)]
    name: String,

    /// TCB description version
    #[arg(short = 'v', long)]
    version: String,

    /// Measurement evidence JSON produced by the TPM tooling
    #[arg(short = 'e', long)]
    evidence: PathBuf,

    /// Keystore path
    #[arg(short = 'k', long)]
    keystore: PathBuf,

    /// Output file
    #[arg(short = 'o', long)]
    output: PathBuf,
}

/// Run one gen-tcb-signature invocation.
pub fn run(args: TcbArgs) -> Result<(), OvsaError> {
    let raw = std::fs::read(&args.evidence)
        .map_err(|e| OvsaError::io(args.evidence.display().to_string(), e))?;
    let evidence: TcbEvidence = serde_json::from_slice(&raw)
        .map_err(|e| OvsaError::invalid(format!("evidence parse: {e}")))?;

    let ctx = CryptoContext::new();
    let keys = open_keystore(&args.keystore)?.load(&ctx)?;

    let tcb = generate_tcb_signature(&ctx, keys.primary, &args.name, &args.version, &evidence)?;
    tcb.write_to(&args.output)?;
    eprintln!("TCB signature written to {}", args.output.display());
    Ok(())
}
