//! `licgen`: build a signed license configuration.

use std::path::PathBuf;

use clap::Args;

use ovsa_core::{LicenseConfigPayload, LicensePolicy, OvsaError, SignedBlob};
use ovsa_crypto::CryptoContext;

use super::open_keystore;

/// Arguments for license-config generation.
#[derive(Args)]
pub struct LicgenArgs {
    /// Policy type: TimeLimit, UsageCount, or Unlimited
    #[arg(short = 't', long = "type")]
    policy_type: String,

    /// Days for TimeLimit policies
    #[arg(short = 'l', long)]
    days: Option<u32>,

    /// Count for UsageCount policies
    #[arg(short = 'c', long)]
    count: Option<u32>,

    /// License offering name
    #[arg(short = 'n', long)]
    name: String,

    /// License offering version
    #[arg(short = 'v', long)]
    version: String,

    /// License-service URLs in preference order (host:port)
    #[arg(short = 'u', long = "url", num_args = 1.., required = true)]
    urls: Vec<String>,

    /// Keystore path
    #[arg(short = 'k', long)]
    keystore: PathBuf,

    /// Output file
    #[arg(short = 'o', long)]
    output: PathBuf,
}

/// Run one licgen invocation.
pub fn run(args: LicgenArgs) -> Result<(), OvsaError> {
    let policy = match args.policy_type.as_str() {
        "TimeLimit" => LicensePolicy::TimeLimit {
            days: args
                .days
                .ok_or_else(|| OvsaError::invalid("TimeLimit requires -l <days>"))?,
        },
        "UsageCount" => LicensePolicy::UsageCount {
            count: args
                .count
                .ok_or_else(|| OvsaError::invalid("UsageCount requires -c <count>"))?,
        },
        "Unlimited" => LicensePolicy::Unlimited,
        other => {
            return Err(OvsaError::invalid(format!(
                "unknown policy type {other}, expected TimeLimit, UsageCount, or Unlimited"
            )))
        }
    };
    policy.validate()?;

    let ctx = CryptoContext::new();
    let keys = open_keystore(&args.keystore)?.load(&ctx)?;

    let payload = LicenseConfigPayload {
        license_name: args.name,
        license_version: args.version,
        license_config: policy,
        license_serv_urls: args.urls,
        isv_certificate: ctx.certificate(keys.primary)?,
    };
    payload.validate()?;

    let config = SignedBlob::create(&ctx, keys.primary, payload)?;
    config.write_to(&args.output)?;
    eprintln!("License configuration written to {}", args.output.display());
    Ok(())
}
