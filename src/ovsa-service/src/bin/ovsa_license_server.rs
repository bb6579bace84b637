//! ovsa-license-server - the license validation daemon.
//!
//! ## Usage
//!
//! ```bash
//! # Ingest a customer license into the store
//! ovsa-license-server ingest --db licenses.db --license customer.lic
//!
//! # Run the daemon
//! ovsa-license-server serve \
//!     --listen 0.0.0.0:4451 \
//!     --cert /opt/ovsa/certs/server.crt \
//!     --key /opt/ovsa/certs/server.key \
//!     --db licenses.db \
//!     --ak-anchor /opt/ovsa/certs/ak_anchor.crt
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ovsa_core::CustomerLicense;
use ovsa_service::{LicenseDb, LicenseService, ServiceConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// License validation daemon and store administration.
#[derive(Parser)]
#[command(name = "ovsa-license-server")]
#[command(version = VERSION)]
#[command(about = "OVSA license service")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the validation daemon
    Serve {
        /// Listen address
        #[arg(long, default_value = "0.0.0.0:4451")]
        listen: String,

        /// PEM server certificate (pinned into customer licenses)
        #[arg(long)]
        cert: PathBuf,

        /// PEM PKCS#8 server private key
        #[arg(long)]
        key: PathBuf,

        /// License store file
        #[arg(long)]
        db: PathBuf,

        /// PEM attestation-key anchor
        #[arg(long)]
        ak_anchor: PathBuf,
    },

    /// Verify and insert a customer license into the store
    Ingest {
        /// License store file
        #[arg(long)]
        db: PathBuf,

        /// Customer license file
        #[arg(long)]
        license: PathBuf,
    },

    /// Revoke a license by GUID
    Revoke {
        /// License store file
        #[arg(long)]
        db: PathBuf,

        /// License GUID to revoke
        #[arg(long)]
        license_guid: String,
    },

    /// Mark overdue TimeLimit licenses as expired
    ExpireOverdue {
        /// License store file
        #[arg(long)]
        db: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
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

    match cli.command {
        Commands::Serve {
            listen,
            cert,
            key,
            db,
            ak_anchor,
        } => {
            let config = ServiceConfig {
                listen_addr: listen,
                server_cert_path: cert,
                server_key_path: key,
                db_path: db,
                ak_anchor_path: ak_anchor,
                ..Default::default()
            };
            let service = LicenseService::new(config)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(service.run())?;
        }
        Commands::Ingest { db, license } => {
            let store = LicenseDb::open(&db)?;
            let license = CustomerLicense::read_from(&license)?;
            store.ingest(&license)?;
            eprintln!("Ingested license {}", license.payload.license_guid);
        }
        Commands::Revoke { db, license_guid } => {
            let store = LicenseDb::open(&db)?;
            if store.revoke(&license_guid)? {
                eprintln!("Revoked license {license_guid}");
            } else {
                eprintln!("License {license_guid} was not active");
            }
        }
        Commands::ExpireOverdue { db } => {
            let store = LicenseDb::open(&db)?;
            let count = store.expire_overdue(chrono::Utc::now().timestamp())?;
            eprintln!("Expired {count} overdue licenses");
        }
    }
    Ok(())
}
