//! `sale`: mint a customer license from a master license.

use std::path::PathBuf;

use clap::Args;

use ovsa_core::{mint, MintRequest, OvsaError};

use super::open_keystore;

/// Arguments for customer-license minting.
#[derive(Args)]
pub struct SaleArgs {
    /// Master license file
    #[arg(short = 'm', long)]
    master: PathBuf,

    /// Signed license configuration file
    #[arg(short = 'l', long)]
    license_config: PathBuf,

    /// Signed TCB description file
    #[arg(short = 't', long)]
    tcb: PathBuf,

    /// Customer primary certificate, PEM
    #[arg(short = 'p', long)]
    customer_cert: PathBuf,

    /// Customer secondary certificate, PEM
    #[arg(long)]
    customer_secondary_cert: Option<PathBuf>,

    /// License-service certificate to pin, PEM
    #[arg(short = 's', long)]
    server_cert: PathBuf,

    /// Keystore path
    #[arg(short = 'k', long)]
    keystore: PathBuf,

    /// Output customer license file
    #[arg(short = 'o', long)]
    output: PathBuf,
}

/// Run one sale invocation.
pub fn run(args: SaleArgs) -> Result<(), OvsaError> {
    let keystore = open_keystore(&args.keystore)?;
    let license_guid = mint(
        &keystore,
        &MintRequest {
            master_license: args.master,
            license_config: args.license_config,
            tcb_signature: args.tcb,
            customer_primary_cert: args.customer_cert,
            customer_secondary_cert: args.customer_secondary_cert,
            license_server_cert: args.server_cert,
            output: args.output.clone(),
        },
    )?;
    eprintln!(
        "Customer license {} written to {}",
        license_guid,
        args.output.display()
    );
    Ok(())
}
