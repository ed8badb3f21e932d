//! Durable mirrors for the session entries.
//!
//! Two independent string entries are kept: the bearer token and the
//! JSON-serialized user profile. They are written and cleared together by
//! convention only. The HTTP transport keeps its cookie jar in a third entry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use keyring::Entry;

/// Entry holding the bearer token
pub const TOKEN_KEY: &str = "access_token";

/// Entry holding the serialized user profile
pub const PROFILE_KEY: &str = "user";

/// Entry holding the serialized cookie jar
pub const COOKIES_KEY: &str = "cookies";

const KEYRING_SERVICE: &str = "eduportal";

pub trait DurableStorage: Send + Sync {
    /// Read an entry. `Ok(None)` when it was never written or was removed.
    fn read(&self, key: &str) -> Result<Option<String>>;

    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Remove an entry. Removing a missing entry is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// One file per entry in a data directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl DurableStorage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read session entry: {}", key))?;
        Ok(Some(contents))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir).context("Failed to create session directory")?;
        std::fs::write(self.entry_path(key), value)
            .with_context(|| format!("Failed to write session entry: {}", key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key);
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove session entry: {}", key))?;
        }
        Ok(())
    }
}

/// Entries stored in the OS keychain, one credential per key.
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableStorage for KeyringStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve entry from keychain"),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store entry in keychain")
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete entry from keychain"),
        }
    }
}

/// Process-local storage. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

impl DurableStorage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "eduportal-storage-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_file_storage_entries_are_independent() {
        let dir = temp_dir("independent");
        let storage = FileStorage::new(dir.clone());

        assert_eq!(storage.read(TOKEN_KEY).unwrap(), None);
        storage.write(TOKEN_KEY, "abc").unwrap();
        storage.write(PROFILE_KEY, r#"{"id":1}"#).unwrap();
        assert_eq!(storage.read(TOKEN_KEY).unwrap().as_deref(), Some("abc"));

        storage.remove(TOKEN_KEY).unwrap();
        assert_eq!(storage.read(TOKEN_KEY).unwrap(), None);
        assert_eq!(storage.read(PROFILE_KEY).unwrap().as_deref(), Some(r#"{"id":1}"#));

        // removing twice is fine
        storage.remove(TOKEN_KEY).unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage.write(PROFILE_KEY, "{}").unwrap();
        assert!(storage.contains(PROFILE_KEY));
        storage.remove(PROFILE_KEY).unwrap();
        assert!(!storage.contains(PROFILE_KEY));
        assert_eq!(storage.read(PROFILE_KEY).unwrap(), None);
    }
}
