//! Shared fixtures: a scripted in-memory backend and token minting.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use eduportal_core::api::endpoints;
use eduportal_core::api::{ApiError, ApiRequest, ApiResponse, Transport};
use eduportal_core::auth::{Credential, CredentialOrigin, MemoryStorage};
use eduportal_core::{ApiGateway, CredentialStore, SessionEvent, UserProfile};

/// Answers each endpoint from a queue of scripted responses (or transport
/// failures), recording every request it sees. Unscripted endpoints answer 404.
#[derive(Default)]
pub struct FakeBackend {
    log: Mutex<Vec<ApiRequest>>,
    scripted: Mutex<HashMap<String, VecDeque<Result<ApiResponse, ApiError>>>>,
    delays: Mutex<HashMap<String, Duration>>,
    cookie_persistence: Mutex<Vec<bool>>,
    cookie_clears: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, endpoint: &str, status: u16, body: Value) {
        let body = if body.is_null() { String::new() } else { body.to_string() };
        self.push(endpoint, Ok(ApiResponse::new(status, body)));
    }

    /// The next request to `endpoint` gets no response at all.
    pub fn script_failure(&self, endpoint: &str, message: &str) {
        self.push(endpoint, Err(ApiError::Transport(message.to_string())));
    }

    fn push(&self, endpoint: &str, outcome: Result<ApiResponse, ApiError>) {
        self.scripted
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn script_refresh(&self, token: &str) {
        self.script(endpoints::TOKEN_REFRESH, 200, json!({ "access": token }));
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.set_delay(endpoints::TOKEN_REFRESH, delay);
    }

    /// Hold every response from `endpoint` back for `delay`.
    pub fn set_delay(&self, endpoint: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(endpoint.to_string(), delay);
    }

    /// Every `persist_cookies` call, in order.
    pub fn cookie_persistence(&self) -> Vec<bool> {
        self.cookie_persistence.lock().unwrap().clone()
    }

    pub fn cookie_clears(&self) -> usize {
        self.cookie_clears.load(Ordering::SeqCst)
    }

    pub fn requests_to(&self, endpoint: &str) -> Vec<ApiRequest> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .cloned()
            .collect()
    }

    pub fn count(&self, endpoint: &str) -> usize {
        self.requests_to(endpoint).len()
    }

    pub fn refresh_count(&self) -> usize {
        self.count(endpoints::TOKEN_REFRESH)
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let endpoint = request.endpoint.clone();
        self.log.lock().unwrap().push(request);

        let delay = self.delays.lock().unwrap().get(&endpoint).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Ok(ApiResponse::new(404, r#"{"detail": "Not found."}"#)))
    }

    fn persist_cookies(&self, persist: bool) {
        self.cookie_persistence.lock().unwrap().push(persist);
    }

    fn clear_cookies(&self) {
        self.cookie_clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mint an unsigned JWT expiring `expires_in` seconds from now.
pub fn token(expires_in: i64, user_id: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = json!({
        "token_type": "access",
        "exp": Utc::now().timestamp() + expires_in,
        "user_id": user_id,
        "role": "admin",
        "is_admin": true
    });
    let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
    // user_id and expiry alone can collide between tokens minted in the same
    // second, so the signature segment carries a unique suffix
    format!("{}.{}.sig{}", header, payload, next_serial())
}

fn next_serial() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SERIAL: AtomicU64 = AtomicU64::new(0);
    SERIAL.fetch_add(1, Ordering::Relaxed)
}

pub fn credential(expires_in: i64) -> Credential {
    Credential::parse(token(expires_in, 1), CredentialOrigin::Issued).unwrap()
}

pub fn profile() -> UserProfile {
    UserProfile {
        id: 1,
        first_name: "Ada".to_string(),
        last_name: "Admin".to_string(),
        email: "ada@example.edu".to_string(),
        role: Some("admin".to_string()),
        is_admin: true,
        is_staff: true,
        is_superuser: false,
    }
}

pub fn profile_json() -> Value {
    serde_json::to_value(profile()).unwrap()
}

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub storage: Arc<MemoryStorage>,
    pub gateway: ApiGateway,
    pub events: broadcast::Receiver<SessionEvent>,
}

pub fn harness() -> Harness {
    let backend = FakeBackend::new();
    let storage = Arc::new(MemoryStorage::new());
    let credentials = Arc::new(CredentialStore::new(storage.clone()));
    let gateway = ApiGateway::new(backend.clone(), credentials);
    let events = gateway.subscribe();
    Harness {
        backend,
        storage,
        gateway,
        events,
    }
}

/// Every event published so far.
pub fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}
