//! `keygen`: keystore creation and certificate management.

use std::path::PathBuf;

use base64::Engine;
use clap::{Args, Subcommand};

use ovsa_core::OvsaError;
use ovsa_crypto::{CryptoContext, EcdsaAlgorithm};
use ovsa_keystore::{KeypairKind, SubjectName};

use super::open_keystore;

/// Keystore management commands.
#[derive(Args)]
pub struct KeygenArgs {
    #[command(subcommand)]
    command: KeygenCommand,
}

#[derive(Subcommand)]
enum KeygenCommand {
    /// Create primary and secondary keypairs with CSRs and self-signed
    /// certificates
    Storekey {
        /// Key type (ECDSA, optionally ECDSA384)
        #[arg(short = 't', long = "type", default_value = "ECDSA")]
        key_type: String,

        /// Keystore path
        #[arg(short = 'k', long)]
        keystore: PathBuf,

        /// Certificate subject, OpenSSL form (/C=IN/CN=localhost)
        #[arg(short = 'e', long)]
        subject: String,
    },

    /// Attach an externally signed certificate to a stored keypair
    Storecert {
        /// Keystore path
        #[arg(short = 'k', long)]
        keystore: PathBuf,

        /// PEM certificate file
        #[arg(short = 'c', long)]
        cert: PathBuf,

        /// Attach to the secondary keypair instead of the primary
        #[arg(long)]
        secondary: bool,
    },

    /// Write the stored certificate to a file
    Getcert {
        /// Keystore path
        #[arg(short = 'k', long)]
        keystore: PathBuf,

        /// Output file
        #[arg(short = 'o', long)]
        output: PathBuf,

        /// Extract the secondary certificate instead of the primary
        #[arg(long)]
        secondary: bool,
    },

    /// Sign a file with the primary keypair (detached signature)
    Sign {
        /// Keystore path
        #[arg(short = 'k', long)]
        keystore: PathBuf,

        /// File to sign
        #[arg(short = 'i', long)]
        input: PathBuf,

        /// Signature output file
        #[arg(short = 'o', long)]
        output: PathBuf,
    },

    /// Verify a detached signature against a certificate
    Verify {
        /// Signed file
        #[arg(short = 'i', long)]
        input: PathBuf,

        /// Signature file
        #[arg(short = 's', long)]
        signature: PathBuf,

        /// PEM certificate of the signer
        #[arg(short = 'c', long)]
        cert: PathBuf,
    },
}

/// Dispatch one keygen invocation.
pub fn run(args: KeygenArgs) -> Result<(), OvsaError> {
    match args.command {
        KeygenCommand::Storekey {
            key_type,
            keystore,
            subject,
        } => {
            let algorithm = match key_type.as_str() {
                "ECDSA" => EcdsaAlgorithm::P256,
                "ECDSA384" => EcdsaAlgorithm::P384,
                other => {
                    return Err(OvsaError::invalid(format!("unsupported key type {other}")))
                }
            };
            let subject = SubjectName::parse(&subject)?;
            let ks = open_keystore(&keystore)?;
            let created = ks.create(algorithm, &subject)?;
            for path in created.paths {
                eprintln!("Created {}", path.display());
            }
            Ok(())
        }
        KeygenCommand::Storecert {
            keystore,
            cert,
            secondary,
        } => {
            let pem = std::fs::read_to_string(&cert)
                .map_err(|e| OvsaError::io(cert.display().to_string(), e))?;
            let kind = if secondary {
                KeypairKind::Secondary
            } else {
                KeypairKind::Primary
            };
            open_keystore(&keystore)?.attach_certificate(kind, &pem)?;
            eprintln!("Certificate attached to {kind:?} keypair");
            Ok(())
        }
        KeygenCommand::Getcert {
            keystore,
            output,
            secondary,
        } => {
            let kind = if secondary {
                KeypairKind::Secondary
            } else {
                KeypairKind::Primary
            };
            let pem = open_keystore(&keystore)?.certificate(kind)?;
            std::fs::write(&output, pem)
                .map_err(|e| OvsaError::io(output.display().to_string(), e))?;
            eprintln!("Certificate written to {}", output.display());
            Ok(())
        }
        KeygenCommand::Sign {
            keystore,
            input,
            output,
        } => {
            let data = std::fs::read(&input)
                .map_err(|e| OvsaError::io(input.display().to_string(), e))?;
            let ctx = CryptoContext::new();
            let keys = open_keystore(&keystore)?.load(&ctx)?;
            let signature = ctx.sign(keys.primary, &data)?;
            std::fs::write(
                &output,
                base64::engine::general_purpose::STANDARD.encode(signature),
            )
            .map_err(|e| OvsaError::io(output.display().to_string(), e))?;
            eprintln!("Signature written to {}", output.display());
            Ok(())
        }
        KeygenCommand::Verify {
            input,
            signature,
            cert,
        } => {
            let data = std::fs::read(&input)
                .map_err(|e| OvsaError::io(input.display().to_string(), e))?;
            let sig_b64 = std::fs::read_to_string(&signature)
                .map_err(|e| OvsaError::io(signature.display().to_string(), e))?;
            let sig = base64::engine::general_purpose::STANDARD
                .decode(sig_b64.trim())
                .map_err(|_| OvsaError::verify("signature file is not base64"))?;
            let pem = std::fs::read_to_string(&cert)
                .map_err(|e| OvsaError::io(cert.display().to_string(), e))?;
            let public_key = ovsa_crypto::public_key_from_cert(&pem)?;
            ovsa_crypto::verify_with_public_key(&public_key, &data, &sig)?;
            eprintln!("Signature verified");
            Ok(())
        }
    }
}
