//! Cookie jar shared by the HTTP clients.
//!
//! The backend keeps its refresh token in an httpOnly cookie, so the jar is
//! written to durable storage next to the bearer token. A restarted process
//! can then still refresh an expired restored session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use cookie_store::CookieStore;
use reqwest_cookie_store::CookieStoreMutex;
use tracing::{debug, warn};

use crate::auth::storage::{DurableStorage, COOKIES_KEY};

pub struct CookieJar {
    store: Arc<CookieStoreMutex>,
    storage: Arc<dyn DurableStorage>,
    /// Whether changes are mirrored to `storage`
    persist: AtomicBool,
}

impl CookieJar {
    /// Load the saved jar. An unreadable entry starts an empty jar.
    pub fn load(storage: Arc<dyn DurableStorage>) -> Self {
        let store = match storage.read(COOKIES_KEY) {
            Ok(Some(saved)) => match cookie_store::serde::json::load_all(saved.as_bytes()) {
                Ok(store) => store,
                Err(e) => {
                    warn!(error = %e, "Saved cookies are unreadable, starting empty");
                    CookieStore::default()
                }
            },
            Ok(None) => CookieStore::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read saved cookies");
                CookieStore::default()
            }
        };

        Self {
            store: Arc::new(CookieStoreMutex::new(store)),
            storage,
            persist: AtomicBool::new(true),
        }
    }

    /// The jar handed to reqwest as its cookie provider.
    pub fn provider(&self) -> Arc<CookieStoreMutex> {
        Arc::clone(&self.store)
    }

    /// Mirror the jar to durable storage, if persistence is on.
    pub fn save(&self) {
        if !self.persist.load(Ordering::Relaxed) {
            return;
        }
        let mut buf = Vec::new();
        let result = {
            let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            cookie_store::serde::json::save_incl_expired_and_nonpersistent(&store, &mut buf)
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to serialize cookies");
            return;
        }
        if let Err(e) = self
            .storage
            .write(COOKIES_KEY, &String::from_utf8_lossy(&buf))
        {
            warn!(error = %e, "Failed to persist cookies");
        }
    }

    /// Turn mirroring on (writing the jar now) or off (removing the entry).
    pub fn set_persistent(&self, persist: bool) {
        self.persist.store(persist, Ordering::Relaxed);
        if persist {
            self.save();
        } else {
            self.remove_saved();
        }
    }

    /// Drop every cookie, in memory and in storage.
    pub fn clear(&self) {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.remove_saved();
        debug!("Cookie jar cleared");
    }

    fn remove_saved(&self) {
        if let Err(e) = self.storage.remove(COOKIES_KEY) {
            warn!(error = %e, "Failed to remove saved cookies");
        }
    }
}
