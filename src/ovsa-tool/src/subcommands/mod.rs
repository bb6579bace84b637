//! Subcommand implementations.

pub mod keygen;
pub mod licgen;
pub mod protect;
pub mod sale;
pub mod tcb;

use std::path::PathBuf;
use std::sync::Arc;

use ovsa_core::OvsaError;
use ovsa_keystore::{Keystore, SoftwareWrappingKey};

/// Open the keystore at `path` with the machine-bound wrapping key.
pub fn open_keystore(path: &PathBuf) -> Result<Keystore, OvsaError> {
    let provider = SoftwareWrappingKey::from_machine_id()?;
    Ok(Keystore::new(path.clone(), Arc::new(provider)))
}
