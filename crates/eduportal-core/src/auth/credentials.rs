//! The credential store: the single holder of the current bearer token.
//!
//! Memory is authoritative. The durable entry is a mirror written only by
//! `persist` (and by refreshes of a persisted credential) so that
//! "remember me" stays optional.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use super::claims::{Credential, CredentialOrigin};
use super::storage::{DurableStorage, TOKEN_KEY};

struct Slot {
    credential: Option<Credential>,
    /// Whether the durable mirror tracks this credential
    remembered: bool,
    /// Advances on every mutation
    epoch: u64,
}

pub struct CredentialStore {
    slot: RwLock<Slot>,
    storage: Arc<dyn DurableStorage>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self {
            slot: RwLock::new(Slot {
                credential: None,
                remembered: false,
                epoch: 0,
            }),
            storage,
        }
    }

    pub fn storage(&self) -> &Arc<dyn DurableStorage> {
        &self.storage
    }

    pub fn get(&self) -> Option<Credential> {
        self.read_slot().credential.clone()
    }

    /// Current mutation epoch. A refresh started at epoch `n` may only
    /// install its result while the epoch is still `n`.
    pub fn epoch(&self) -> u64 {
        self.read_slot().epoch
    }

    pub fn is_remembered(&self) -> bool {
        self.read_slot().remembered
    }

    /// Replace the in-memory credential without touching durable storage.
    pub fn set(&self, credential: Credential) {
        let mut slot = self.write_slot();
        slot.credential = Some(credential);
        slot.remembered = false;
        slot.epoch += 1;
    }

    /// Replace the in-memory credential and mirror it to durable storage.
    pub fn persist(&self, credential: Credential) {
        self.write_mirror(credential.token());
        let mut slot = self.write_slot();
        slot.credential = Some(credential);
        slot.remembered = true;
        slot.epoch += 1;
    }

    /// Adopt a credential read back from durable storage. The mirror already
    /// holds it, so nothing is written.
    pub fn adopt_restored(&self, credential: Credential) {
        let mut slot = self.write_slot();
        slot.credential = Some(credential);
        slot.remembered = true;
        slot.epoch += 1;
    }

    /// Install a refreshed credential if nothing replaced or cleared the
    /// store since `epoch`. Returns false when the result is stale.
    pub fn install_if_current(&self, epoch: u64, credential: Credential) -> bool {
        let mut slot = self.write_slot();
        if slot.epoch != epoch {
            debug!(
                started = epoch,
                current = slot.epoch,
                "Discarding refreshed credential for a superseded session"
            );
            return false;
        }
        if slot.remembered {
            self.write_mirror(credential.token());
        }
        slot.credential = Some(credential);
        slot.epoch += 1;
        true
    }

    /// Remove the in-memory credential.
    pub fn clear(&self) {
        let mut slot = self.write_slot();
        slot.credential = None;
        slot.epoch += 1;
    }

    /// Remove the credential from durable storage and memory.
    pub fn clear_persisted(&self) {
        if let Err(e) = self.storage.remove(TOKEN_KEY) {
            warn!(error = %e, "Failed to remove persisted token");
        }
        let mut slot = self.write_slot();
        slot.credential = None;
        slot.remembered = false;
        slot.epoch += 1;
    }

    /// Read the raw persisted token, if any.
    pub fn read_persisted(&self) -> Option<String> {
        match self.storage.read(TOKEN_KEY) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted token");
                None
            }
        }
    }

    /// Parse the persisted token. `Err` carries the reason it is unusable.
    pub fn load_persisted(&self) -> Option<Result<Credential, super::ClaimsError>> {
        self.read_persisted()
            .map(|token| Credential::parse(token.trim(), CredentialOrigin::Restored))
    }

    fn write_mirror(&self, token: &str) {
        if let Err(e) = self.storage.write(TOKEN_KEY, token) {
            warn!(error = %e, "Failed to persist token");
        }
    }

    fn read_slot(&self) -> std::sync::RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slot(&self) -> std::sync::RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }
}
