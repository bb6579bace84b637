//! ovsa-tool - the issuer's command line for the model protection toolchain.
//!
//! ## Usage
//!
//! ```bash
//! # Create an issuer keystore (primary + secondary keypairs, CSRs,
//! # self-signed certificates)
//! ovsa-tool keygen storekey -t ECDSA -k ks -e "/C=IN/CN=localhost"
//!
//! # Attach a CA-signed certificate after the CSR round-trip
//! ovsa-tool keygen storecert -k ks -c primary_ks.csr.signed.crt
//!
//! # Encrypt model files into a protected bundle plus master license
//! ovsa-tool protect -i face_detection.xml face_detection.bin \
//!     -n "Face Detection" -d "Face person detection retail" -v 0002 \
//!     -k ks -g 50934a64-5d1b-4655-bcb4-80080fcb8858 -p m.dat -m m.mlic
//!
//! # Build a signed license configuration
//! ovsa-tool licgen -t TimeLimit -l 30 -n "retail" -v 1 \
//!     -u license.example:4451 -k ks -o license.config
//!
//! # Sign a TCB description
//! ovsa-tool gen-tcb-signature -n "production-runtime" -v 1 \
//!     -e evidence.json -k ks -o runtime.tcb
//!
//! # Mint a customer license
//! ovsa-tool sale -m m.mlic -l license.config -t runtime.tcb \
//!     -p customer_primary.crt -s server.crt -k ks -o customer.lic
//! ```
//!
//! Exit codes: 0 success, 1 invalid parameter, 2 file I/O, 3 crypto
//! failure, 4 verification failed, 5 policy exhausted or expired.

mod subcommands;

use clap::{Parser, Subcommand};

use ovsa_core::OvsaError;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Issuer command line for protected model bundles and licenses.
#[derive(Parser)]
#[command(name = "ovsa-tool")]
#[command(version = VERSION)]
#[command(about = "OVSA model protection and licensing tool")]
struct Cli {
    /// Enable verbose output
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keystore management
    Keygen(subcommands::keygen::KeygenArgs),
    /// Encrypt model files and emit the signed bundle + master license
    Protect(subcommands::protect::ProtectArgs),
    /// Build a signed license configuration
    Licgen(subcommands::licgen::LicgenArgs),
    /// Sign a TCB description from measurement evidence
    #[command(name = "gen-tcb-signature")]
    GenTcbSignature(subcommands::tcb::TcbArgs),
    /// Mint a customer license from a master license
    Sale(subcommands::sale::SaleArgs),
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let result: Result<(), OvsaError> = match cli.command {
        Commands::Keygen(args) => subcommands::keygen::run(args),
        Commands::Protect(args) => subcommands::protect::run(args),
        Commands::Licgen(args) => subcommands::licgen::run(args),
        Commands::GenTcbSignature(args) => subcommands::tcb::run(args),
        Commands::Sale(args) => subcommands::sale::run(args),
    };

    if let Err(err) = result {
        eprintln!("{}: {err}", err.error_tag());
        std::process::exit(err.exit_code());
    }
}
