//! # ovsa-keystore
//!
//! Persistent holder of the issuer's (or customer's) primary and secondary
//! ECDSA keypairs and their certificates.
//!
//! A keystore named `ks` lives as two sibling record files, `primary_ks`
//! and `secondary_ks`. Each record keeps the private scalar encrypted under
//! a wrapping key that never touches the disk - TPM-rooted on provisioned
//! customer hosts, machine-bound software derivation elsewhere - and is
//! HMAC-protected as a whole. `keygen storekey` creates the pair along with
//! a CSR and a self-signed certificate per keypair; `keygen storecert`
//! swaps in an externally signed certificate after checking it matches the
//! stored key; loading opens both keypairs into in-memory key slots.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::missing_errors_doc)] // Error documentation not required

mod container;
mod csr;
mod error;
mod keystore;
mod wrapping;

pub use container::{KeypairKind, CONTAINER_VERSION};
pub use csr::{issue_credentials, IssuedCredentials, SubjectName};
pub use error::KeystoreError;
pub use keystore::{CreatedFiles, Keystore, LoadedKeys};
pub use wrapping::{SoftwareWrappingKey, WrappingKeyProvider};
