//! The user profile cached alongside the bearer token.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::claims::Credential;
use super::storage::{DurableStorage, PROFILE_KEY};

/// Minimal profile of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserProfile {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub is_superuser: bool,
}

impl UserProfile {
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }

    pub fn is_teacher(&self) -> bool {
        self.role.as_deref() == Some("teacher")
    }

    pub fn is_student(&self) -> bool {
        self.role.as_deref() == Some("student")
    }

    pub fn can_manage_site(&self) -> bool {
        self.is_admin || self.is_superuser || self.role.as_deref() == Some("admin")
    }
}

/// Result of reading the durable profile entry.
#[derive(Debug)]
pub enum StoredProfile {
    Absent,
    Present(UserProfile),
    Corrupt(String),
}

/// A signed-in user: credential plus cached profile.
#[derive(Debug, Clone)]
pub struct Session {
    pub credential: Credential,
    pub profile: UserProfile,
}

impl Session {
    pub fn is_valid(&self) -> bool {
        !self.credential.is_expired()
    }
}

pub struct ProfileCache {
    profile: RwLock<Option<UserProfile>>,
    storage: Arc<dyn DurableStorage>,
}

impl ProfileCache {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self {
            profile: RwLock::new(None),
            storage,
        }
    }

    pub fn get(&self) -> Option<UserProfile> {
        self.profile
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cache in memory and, when `persist` is set, in the durable entry.
    pub fn save(&self, profile: UserProfile, persist: bool) {
        if persist {
            match serde_json::to_string(&profile) {
                Ok(json) => {
                    if let Err(e) = self.storage.write(PROFILE_KEY, &json) {
                        warn!(error = %e, "Failed to persist user profile");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize user profile"),
            }
        }
        *self.profile.write().unwrap_or_else(PoisonError::into_inner) = Some(profile);
    }

    /// Read the durable entry without touching memory.
    pub fn load(&self) -> StoredProfile {
        let raw = match self.storage.read(PROFILE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return StoredProfile::Absent,
            Err(e) => return StoredProfile::Corrupt(e.to_string()),
        };
        match serde_json::from_str(&raw) {
            Ok(profile) => StoredProfile::Present(profile),
            Err(e) => StoredProfile::Corrupt(e.to_string()),
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.storage.remove(PROFILE_KEY) {
            warn!(error = %e, "Failed to remove persisted user profile");
        }
        *self.profile.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryStorage;

    fn profile() -> UserProfile {
        UserProfile {
            id: 1,
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.edu".to_string(),
            role: Some("teacher".to_string()),
            is_admin: false,
            is_staff: true,
            is_superuser: false,
        }
    }

    #[test]
    fn test_profile_display_helpers() {
        let p = profile();
        assert_eq!(p.full_name(), "Ada Lovelace");
        assert!(p.is_teacher());
        assert!(!p.can_manage_site());

        let anonymous = UserProfile {
            first_name: String::new(),
            last_name: String::new(),
            ..profile()
        };
        assert_eq!(anonymous.full_name(), "ada@example.edu");
    }

    #[test]
    fn test_save_load_and_clear() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = ProfileCache::new(storage.clone());
        assert!(matches!(cache.load(), StoredProfile::Absent));

        cache.save(profile(), false);
        assert_eq!(cache.get(), Some(profile()));
        assert!(!storage.contains(PROFILE_KEY));

        cache.save(profile(), true);
        assert!(matches!(cache.load(), StoredProfile::Present(p) if p == profile()));

        cache.clear();
        assert!(cache.get().is_none());
        assert!(!storage.contains(PROFILE_KEY));
    }

    #[test]
    fn test_truncated_profile_is_corrupt() {
        let storage = Arc::new(MemoryStorage::new());
        storage.write(PROFILE_KEY, r#"{"id": 1, "email": "ada@ex"#).unwrap();
        let cache = ProfileCache::new(storage);
        assert!(matches!(cache.load(), StoredProfile::Corrupt(_)));
    }
}
