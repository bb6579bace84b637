//! `protect`: encrypt model files, emit the signed bundle and master
//! license.

use std::path::PathBuf;

use clap::Args;

use ovsa_core::{
    protect, Guid, ModelDescription, ModelMetadata, ModelName, OvsaError, ProtectRequest,
    VersionTag,
};

use super::open_keystore;

/// Arguments for the protect pipeline.
#[derive(Args)]
pub struct ProtectArgs {
    /// Model files to encrypt, in bundle order
    #[arg(short = 'i', long = "input", num_args = 1.., required = true)]
    inputs: Vec<PathBuf>,

    /// Model name
    #[arg(short = 'n', long)]
    name: String,

    /// Model description
    #[arg(short = 'd', long)]
    description: String,

    /// Model version
    #[arg(short = 'v', long)]
    version: String,

    /// Keystore path
    #[arg(short = 'k', long)]
    keystore: PathBuf,

    /// License GUID for the master license
    #[arg(short = 'g', long)]
    guid: String,

    /// Protected bundle output file
    #[arg(short = 'p', long)]
    protect_out: PathBuf,

    /// Master license output file
    #[arg(short = 'm', long)]
    master_out: PathBuf,
}

/// Run one protect invocation.
pub fn run(args: ProtectArgs) -> Result<(), OvsaError> {
    let request = ProtectRequest {
        model_files: args.inputs,
        metadata: ModelMetadata {
            name: ModelName::new(args.name)?,
            description: ModelDescription::new(args.description)?,
            version: VersionTag::new(args.version)?,
        },
        license_guid: Guid::new(args.guid)?,
        protect_out: args.protect_out,
        master_out: args.master_out,
    };
    let keystore = open_keystore(&args.keystore)?;
    let outcome = protect(&keystore, &request)?;
    eprintln!(
        "Protected bundle {} (model GUID {})",
        request.protect_out.display(),
        outcome.model_guid
    );
    Ok(())
}
