//! Process-local key slot table.
//!
//! All key material handled by the toolchain lives in numbered slots owned by
//! a [`CryptoContext`]. Callers hold opaque [`SlotId`]s; the material itself
//! never crosses the context boundary except through the primitive operations.
//!
//! ## Invariants
//!
//! - Slot ids are allocated in `[MIN_KEY_SLOT, MAX_KEY_SLOT)` and are never
//!   recycled within a context.
//! - Clearing a slot zeroizes its material before releasing it.
//! - Dropping the context clears every remaining slot.

use std::collections::HashMap;
use std::sync::Mutex;

use zeroize::{Zeroize, Zeroizing};

use crate::ecdsa::EcdsaAlgorithm;
use crate::error::CryptoError;

/// Lowest valid slot id.
pub const MIN_KEY_SLOT: u32 = 1;
/// One past the highest valid slot id.
pub const MAX_KEY_SLOT: u32 = 64;

/// Size in bytes of a symmetric content-encryption key.
pub const SYMMETRIC_KEY_SIZE: usize = 32;
/// Size in bytes of an HMAC-SHA-256 key.
pub const HMAC_KEY_SIZE: usize = 32;

/// Opaque handle to a key slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub(crate) u32);

impl SlotId {
    /// The raw slot number.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Material held in a slot.
pub(crate) enum SlotMaterial {
    /// An asymmetric keypair, private scalar in SEC1 form, plus the PEM
    /// certificate attached to it (if any).
    Asymmetric {
        algorithm: EcdsaAlgorithm,
        private_key: Zeroizing<Vec<u8>>,
        certificate: Option<String>,
    },
    /// A symmetric content-encryption key.
    Symmetric { key: Zeroizing<Vec<u8>> },
    /// An HMAC key derived alongside a key-encryption key.
    Hmac { key: Zeroizing<Vec<u8>> },
}

impl Zeroize for SlotMaterial {
    fn zeroize(&mut self) {
        match self {
            Self::Asymmetric { private_key, .. } => private_key.zeroize(),
            Self::Symmetric { key } | Self::Hmac { key } => key.zeroize(),
        }
    }
}

/// Owner of all key slots allocated during one tool invocation or one
/// service operation.
///
/// Construct one per operation, thread it through the pipeline, and let it
/// drop: every slot still allocated at that point is zeroized.
pub struct CryptoContext {
    pub(crate) slots: Mutex<SlotState>,
}

pub(crate) struct SlotState {
    pub(crate) table: HashMap<u32, SlotMaterial>,
    /// Next slot number to hand out. Monotonic, never reused.
    next: u32,
}

impl CryptoContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(SlotState {
                table: HashMap::new(),
                next: MIN_KEY_SLOT,
            }),
        }
    }

    /// Number of slots currently allocated.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.slots.lock().expect("slot table poisoned").table.len()
    }

    pub(crate) fn insert(&self, material: SlotMaterial) -> Result<SlotId, CryptoError> {
        let mut state = self.slots.lock().expect("slot table poisoned");
        if state.next >= MAX_KEY_SLOT {
            return Err(CryptoError::SlotExhausted);
        }
        let id = state.next;
        state.next += 1;
        state.table.insert(id, material);
        Ok(SlotId(id))
    }

    pub(crate) fn with_slot<R>(
        &self,
        slot: SlotId,
        f: impl FnOnce(&SlotMaterial) -> Result<R, CryptoError>,
    ) -> Result<R, CryptoError> {
        let state = self.slots.lock().expect("slot table poisoned");
        let material = state
            .table
            .get(&slot.0)
            .ok_or(CryptoError::WrongSlot { slot: slot.0 })?;
        f(material)
    }

    /// Zeroize and release one slot. Clearing an already-cleared slot is a
    /// no-op so that cleanup paths can run unconditionally.
    pub fn clear_slot(&self, slot: SlotId) {
        let mut state = self.slots.lock().expect("slot table poisoned");
        if let Some(mut material) = state.table.remove(&slot.0) {
            material.zeroize();
        }
    }

    /// Zeroize and release every slot.
    pub fn clear_all(&self) {
        let mut state = self.slots.lock().expect("slot table poisoned");
        for (_, mut material) in state.table.drain() {
            material.zeroize();
        }
    }

    /// Load a raw symmetric key into a fresh slot.
    ///
    /// Used by the keystore and the unwrap path; `generate_symmetric_key` is
    /// the entry point for fresh keys.
    pub fn import_symmetric_key(&self, key: &[u8]) -> Result<SlotId, CryptoError> {
        if key.len() != SYMMETRIC_KEY_SIZE {
            return Err(CryptoError::invalid(format!(
                "symmetric key must be {SYMMETRIC_KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }
        self.insert(SlotMaterial::Symmetric {
            key: Zeroizing::new(key.to_vec()),
        })
    }

    /// Export a copy of the symmetric key in a slot.
    ///
    /// The copy is zeroized by the caller; only the wrap/unwrap and keystore
    /// paths use this.
    pub fn export_symmetric_key(&self, slot: SlotId) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.with_slot(slot, |material| match material {
            SlotMaterial::Symmetric { key } => Ok(Zeroizing::new(key.to_vec())),
            _ => Err(CryptoError::AlgMismatch {
                reason: "slot does not hold a symmetric key".into(),
            }),
        })
    }
}

impl Default for CryptoContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CryptoContext {
    fn drop(&mut self) {
        self.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_ids_are_monotonic() {
        let ctx = CryptoContext::new();
        let a = ctx.import_symmetric_key(&[0u8; 32]).unwrap();
        let b = ctx.import_symmetric_key(&[1u8; 32]).unwrap();
        assert!(b.index() > a.index());

        // Clearing does not make the id reusable.
        ctx.clear_slot(a);
        let c = ctx.import_symmetric_key(&[2u8; 32]).unwrap();
        assert!(c.index() > b.index());
    }

    #[test]
    fn test_cleared_slot_is_rejected() {
        let ctx = CryptoContext::new();
        let slot = ctx.import_symmetric_key(&[7u8; 32]).unwrap();
        ctx.clear_slot(slot);
        assert!(matches!(
            ctx.export_symmetric_key(slot),
            Err(CryptoError::WrongSlot { .. })
        ));
    }

    #[test]
    fn test_slot_table_exhaustion() {
        let ctx = CryptoContext::new();
        let capacity = (MAX_KEY_SLOT - MIN_KEY_SLOT) as usize;
        for _ in 0..capacity {
            ctx.import_symmetric_key(&[0u8; 32]).unwrap();
        }
        assert!(matches!(
            ctx.import_symmetric_key(&[0u8; 32]),
            Err(CryptoError::SlotExhausted)
        ));
    }

    #[test]
    fn test_wrong_key_size_rejected() {
        let ctx = CryptoContext::new();
        assert!(ctx.import_symmetric_key(&[0u8; 16]).is_err());
    }
}
