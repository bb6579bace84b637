//! # ovsa-core
//!
//! The bundle and license subsystem of the OVSA model protection toolchain.
//!
//! ## Artifact chain
//!
//! ```text
//! protect ──> protected bundle (signed)  +  master license (HMAC, issuer-only)
//!                                              │
//! licgen ──> license config (signed) ──────────┤
//! gen-tcb-signature ──> TCB signature ─────────┤
//!                                              ▼
//! sale ──────────────────────────> customer license (signed, key re-wrapped)
//!                                              │ ingested by
//!                                              ▼
//! runtime client <── validation protocol ──> license service
//! ```
//!
//! Every artifact is a `{payload, signature}` or `{payload, hmac}` envelope
//! whose protection covers the canonical payload bytes, so files survive
//! re-formatting without weakening any check.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::missing_errors_doc)] // Error documentation not required

pub mod bundle;
pub mod client;
pub mod customer;
pub mod envelope;
pub mod error;
pub mod license_config;
pub mod master;
pub mod mint;
pub mod policy;
pub mod proto;
pub mod protect;
pub mod tcb;
pub mod types;

pub use bundle::{BundlePayload, EncryptedModelFile, ProtectedBundle};
pub use client::{load_and_decrypt, ClientConfig, QuoteProvider};
pub use customer::{CustomerLicense, CustomerLicensePayload};
pub use envelope::{MacBlob, SignedBlob};
pub use error::{OvsaError, PolicyViolation};
pub use license_config::{LicenseConfig, LicenseConfigPayload};
pub use master::{MasterLicense, MasterLicensePayload};
pub use mint::{mint, MintRequest};
pub use policy::{LicensePolicy, MAX_TIME_LIMIT_DAYS, MAX_USAGE_COUNT};
pub use proto::{
    authorization_input, read_message, write_message, Message, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use protect::{protect, ProtectOutcome, ProtectRequest};
pub use tcb::{
    generate_tcb_signature, sign_quote, verify_quote, QuoteMeasurement, TcbEvidence, TcbPayload,
    TcbQuote, TcbSignature,
};
pub use types::{
    creation_timestamp, Guid, InputFileName, ModelDescription, ModelMetadata, ModelName,
    ServerUrl, VersionTag, MAX_FILE_NAME, MAX_NAME_SIZE, MAX_URL_SIZE, MAX_VERSION_SIZE,
};
