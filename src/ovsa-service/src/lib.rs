//! # ovsa-service
//!
//! The license service: a multi-connection daemon that stores issued
//! customer licenses in a single relational table and answers the runtime
//! validation protocol over mutually authenticated TLS.
//!
//! ## Shape
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 LicenseService                    │
//! │                                                   │
//! │  accept loop ──> per-connection handler (task)    │
//! │                        │                          │
//! │                        ▼                          │
//! │                   Validator                       │
//! │   (identity, hash, quote, state, policy checks)   │
//! │                        │                          │
//! │                        ▼                          │
//! │                   LicenseDb                       │
//! │      (shared reads, serialized usage decrement)   │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! A failed validation never mutates the store; the usage-count decrement is
//! the single write on the hot path and runs as one conditional UPDATE, so
//! two concurrent validations of a quota-1 license resolve to exactly one
//! success.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::missing_errors_doc)] // Error documentation not required

pub mod config;
pub mod db;
pub mod error;
pub mod server;
pub mod validate;

pub use config::ServiceConfig;
pub use db::{ConsumeOutcome, LicenseDb, LicenseRecord, LicenseStatus};
pub use error::ServiceError;
pub use server::LicenseService;
pub use validate::{Authorization, ValidationRequest, Validator};
