//! Authentication state for the API gateway.
//!
//! This module provides:
//! - `Credential`: a bearer token with its decoded claims
//! - `CredentialStore`: the in-memory credential with a durable mirror
//! - `DurableStorage`: file, keychain and in-memory backends for the mirror
//! - `ProfileCache`: the cached user profile stored next to the token
//!
//! Tokens are treated as expired five minutes before their `exp` claim.

pub mod claims;
pub mod credentials;
pub mod session;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;

use crate::config::{Config, StorageKind};

pub use claims::{ClaimsError, Credential, CredentialOrigin, SubjectId, TokenClaims};
pub use credentials::CredentialStore;
pub use session::{ProfileCache, Session, StoredProfile, UserProfile};
pub use storage::{DurableStorage, FileStorage, KeyringStorage, MemoryStorage};

/// Build the durable storage backend selected in the config.
pub fn storage_from_config(config: &Config) -> Result<Arc<dyn DurableStorage>> {
    let storage: Arc<dyn DurableStorage> = match config.storage {
        StorageKind::File => Arc::new(FileStorage::new(config.data_dir()?)),
        StorageKind::Keyring => Arc::new(KeyringStorage::new()),
        StorageKind::Memory => Arc::new(MemoryStorage::new()),
    };
    Ok(storage)
}
