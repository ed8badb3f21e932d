//! The API gateway: every outbound call goes through here.
//!
//! Per call the gateway decides whether a credential is attached, refreshes
//! it first when it is inside the expiry margin, and on a 401 refreshes once
//! and resends the identical request once. Refreshes are single-flight: all
//! concurrent triggers (calls, the background loop, session restore) await
//! the same in-flight future.
//!
//! The gateway never touches application state. It returns typed results and
//! publishes [`SessionEvent`]s on a broadcast channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::endpoints;
use super::transport::{ApiRequest, ApiResponse, CallOptions, HttpTransport, Transport};
use super::{ApiError, RefreshError};
use crate::auth::{
    self, Credential, CredentialOrigin, CredentialStore, ProfileCache, Session, StoredProfile,
    UserProfile,
};
use crate::config::Config;

/// Period of the background refresh loop (4 minutes)
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(4 * 60);

/// Buffer for session event subscribers
const EVENT_CHANNEL_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    UserRequested,
    RefreshFailed,
    /// The backend rejected a freshly refreshed credential
    Rejected,
    CorruptedState,
}

/// Published whenever the session changes hands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    Restored,
    Refreshed,
    LoggedOut(LogoutReason),
}

#[derive(Debug, Clone)]
pub enum SessionState {
    Authenticated(Session),
    Unauthenticated,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
}

type SharedRefresh = Shared<BoxFuture<'static, Result<Credential, RefreshError>>>;

struct GatewayInner {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    profile: ProfileCache,
    events: broadcast::Sender<SessionEvent>,
    /// The refresh currently in flight, tagged with its id
    in_flight: Mutex<Option<(u64, SharedRefresh)>>,
    next_refresh_id: AtomicU64,
    refresh_loop: Mutex<Option<JoinHandle<()>>>,
    /// Serializes session teardown so `LoggedOut` is published once
    teardown: Mutex<()>,
}

/// Clone is cheap - all state is shared behind an Arc.
#[derive(Clone)]
pub struct ApiGateway {
    inner: Arc<GatewayInner>,
}

impl ApiGateway {
    pub fn new(transport: Arc<dyn Transport>, credentials: Arc<CredentialStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let profile = ProfileCache::new(Arc::clone(credentials.storage()));
        Self {
            inner: Arc::new(GatewayInner {
                transport,
                credentials,
                profile,
                events,
                in_flight: Mutex::new(None),
                next_refresh_id: AtomicU64::new(0),
                refresh_loop: Mutex::new(None),
                teardown: Mutex::new(()),
            }),
        }
    }

    /// Build the configured storage backend and an HTTP transport whose
    /// cookie jar lives in it.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let storage = auth::storage_from_config(config)?;
        let transport = HttpTransport::new(config, Arc::clone(&storage))?;
        let credentials = Arc::new(CredentialStore::new(storage));
        Ok(Self::new(Arc::new(transport), credentials))
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.inner.credentials
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// The current session, if a credential and profile are both held.
    pub fn session(&self) -> Option<Session> {
        let credential = self.inner.credentials.get()?;
        let profile = self.inner.profile.get()?;
        Some(Session {
            credential,
            profile,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().map(|s| s.is_valid()).unwrap_or(false)
    }

    pub fn is_refresh_loop_running(&self) -> bool {
        self.inner
            .refresh_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    // ===== Calls =====

    /// Send a request and return the parsed JSON payload (`null` for an
    /// empty body).
    pub async fn call(&self, endpoint: &str, options: CallOptions) -> Result<Value, ApiError> {
        self.execute(endpoint, options).await?.json()
    }

    pub async fn call_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: CallOptions,
    ) -> Result<T, ApiError> {
        self.execute(endpoint, options).await?.parse()
    }

    async fn execute(&self, endpoint: &str, options: CallOptions) -> Result<ApiResponse, ApiError> {
        let public = endpoints::is_public(endpoint);
        let mut request = ApiRequest::new(endpoint, options);
        request.include_cookies = !public || endpoints::is_refresh(endpoint);

        if public {
            let response = self.inner.transport.send(request).await?;
            return Self::check(response);
        }

        let mut credential = self.inner.credentials.get();
        if credential.as_ref().is_some_and(Credential::is_expired) {
            debug!(endpoint, "Credential inside expiry margin, refreshing before send");
            let refreshed = self
                .refresh()
                .await
                .map_err(|_| ApiError::AuthenticationFailed)?;
            credential = Some(refreshed);
        }
        request.bearer = credential.map(|c| c.token().to_string());

        let response = self.inner.transport.send(request.clone()).await?;
        if response.status != 401 {
            return Self::check(response);
        }

        // A refresh that finished while this request was in flight already
        // produced a newer credential; retry with it instead of refreshing again.
        let newer = self
            .inner
            .credentials
            .get()
            .filter(|c| !c.is_expired() && request.bearer.as_deref() != Some(c.token()));
        let replacement = match newer {
            Some(credential) => {
                debug!(endpoint, "Unauthorized with a replaced credential, retrying with the current one");
                credential
            }
            None => {
                info!(endpoint, "Unauthorized, refreshing credential and retrying once");
                self.refresh()
                    .await
                    .map_err(|_| ApiError::AuthenticationFailed)?
            }
        };
        request.bearer = Some(replacement.token().to_string());

        let retried = self.inner.transport.send(request).await?;
        if retried.status == 401 {
            warn!(endpoint, "Refreshed credential was rejected, ending session");
            self.inner.end_session(LogoutReason::Rejected);
            return Err(ApiError::AuthenticationFailed);
        }
        Self::check(retried)
    }

    fn check(response: ApiResponse) -> Result<ApiResponse, ApiError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.body))
        }
    }

    // ===== Refresh =====

    /// Refresh the credential, joining a refresh already in flight.
    pub async fn refresh(&self) -> Result<Credential, RefreshError> {
        let shared = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some((_, in_flight)) => {
                    debug!("Joining in-flight token refresh");
                    in_flight.clone()
                }
                None => {
                    let id = self.inner.next_refresh_id.fetch_add(1, Ordering::Relaxed);
                    let inner = Arc::clone(&self.inner);
                    let refresh = async move { inner.run_refresh(id).await }.boxed().shared();
                    *slot = Some((id, refresh.clone()));
                    refresh
                }
            }
        };
        shared.await
    }

    /// Refresh only when the held credential is inside the expiry margin.
    pub async fn refresh_if_needed(&self) -> Option<Result<Credential, RefreshError>> {
        let credential = self.inner.credentials.get()?;
        if !credential.is_expired() {
            debug!(
                minutes_left = credential.time_until_expiry().num_minutes(),
                "Credential still fresh"
            );
            return None;
        }
        Some(self.refresh().await)
    }

    // ===== Session lifecycle =====

    /// Install a new session: credential (persisted when `remember`),
    /// profile, background loop, then `event`.
    pub(crate) fn begin_session(
        &self,
        credential: Credential,
        profile: UserProfile,
        remember: bool,
        event: SessionEvent,
    ) -> Session {
        self.inner.forget_in_flight();
        if remember {
            self.inner.credentials.persist(credential.clone());
        } else {
            // a previous remembered session must not survive in the mirror
            self.inner.credentials.clear_persisted();
            self.inner.profile.clear();
            self.inner.credentials.set(credential.clone());
        }
        self.inner.profile.save(profile.clone(), remember);
        self.inner.transport.persist_cookies(remember);
        self.inner.start_refresh_loop();
        self.inner.publish(event);
        Session {
            credential,
            profile,
        }
    }

    pub(crate) fn end_session(&self, reason: LogoutReason) {
        self.inner.end_session(reason);
    }

    pub(crate) fn cache_profile(&self, profile: UserProfile) {
        let persist = self.inner.credentials.is_remembered();
        self.inner.profile.save(profile, persist);
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn start_refresh_loop(&self) {
        self.inner.start_refresh_loop();
    }

    pub fn stop_refresh_loop(&self) {
        self.inner.stop_refresh_loop();
    }

    /// Restore a session from durable storage.
    ///
    /// An unexpired token is adopted as-is; an expired one gets a single
    /// refresh attempt. A token saved without its profile has the profile
    /// fetched. Any unreadable entry discards all persisted auth state.
    pub async fn restore_session(&self) -> SessionState {
        let credential = match self.inner.credentials.load_persisted() {
            None => {
                if !matches!(self.inner.profile.load(), StoredProfile::Absent) {
                    debug!("Discarding cached profile without a token");
                    self.inner.profile.clear();
                }
                // a refresh cookie is useless without the session it belongs to
                self.inner.transport.clear_cookies();
                return SessionState::Unauthenticated;
            }
            Some(Err(e)) => {
                warn!(error = %e, "Persisted token is unreadable, discarding session");
                self.inner.end_session(LogoutReason::CorruptedState);
                return SessionState::Unauthenticated;
            }
            Some(Ok(credential)) => credential,
        };

        let cached = match self.inner.profile.load() {
            StoredProfile::Present(profile) => Some(profile),
            StoredProfile::Absent => None,
            StoredProfile::Corrupt(e) => {
                warn!(error = %e, "Cached profile is unreadable, discarding session");
                self.inner.end_session(LogoutReason::CorruptedState);
                return SessionState::Unauthenticated;
            }
        };

        self.inner.forget_in_flight();
        self.inner.credentials.adopt_restored(credential.clone());
        if let Some(ref profile) = cached {
            self.inner.profile.save(profile.clone(), false);
        }

        let mut credential = if credential.is_expired() {
            info!("Restored credential is expired, attempting refresh");
            match self.refresh().await {
                Ok(refreshed) => refreshed,
                Err(e) => {
                    info!(error = %e, "Could not refresh restored session");
                    return SessionState::Unauthenticated;
                }
            }
        } else {
            credential
        };

        let profile = match cached {
            Some(profile) => profile,
            None => {
                info!("Persisted token has no cached profile, fetching it");
                match self.profile().await {
                    Ok(profile) => {
                        if let Some(current) = self.inner.credentials.get() {
                            credential = current;
                        }
                        profile
                    }
                    Err(e) => {
                        warn!(error = %e, "Could not fetch profile for restored session");
                        // an auth failure has already ended the session
                        if !e.is_auth_failure() {
                            self.inner.end_session(LogoutReason::CorruptedState);
                        }
                        return SessionState::Unauthenticated;
                    }
                }
            }
        };

        self.inner.start_refresh_loop();
        self.inner.publish(SessionEvent::Restored);
        SessionState::Authenticated(Session {
            credential,
            profile,
        })
    }
}

impl GatewayInner {
    async fn run_refresh(self: Arc<Self>, id: u64) -> Result<Credential, RefreshError> {
        let epoch = self.credentials.epoch();
        let result = match self.request_refresh().await {
            Ok(credential) => {
                if self.credentials.install_if_current(epoch, credential.clone()) {
                    info!("Token refreshed");
                    self.publish(SessionEvent::Refreshed);
                    Ok(credential)
                } else {
                    Err(RefreshError::Superseded)
                }
            }
            Err(e) => {
                if self.credentials.epoch() == epoch {
                    warn!(error = %e, "Token refresh failed, ending session");
                    self.end_session(LogoutReason::RefreshFailed);
                } else {
                    debug!(error = %e, "Token refresh failed for a superseded session");
                }
                Err(e)
            }
        };

        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|(current, _)| *current == id) {
            *slot = None;
        }
        result
    }

    async fn request_refresh(&self) -> Result<Credential, RefreshError> {
        let mut request = ApiRequest::new(endpoints::TOKEN_REFRESH, CallOptions::new(Method::POST));
        request.include_cookies = true;

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;
        if !response.is_success() {
            return Err(RefreshError::Rejected(response.status));
        }

        let body: RefreshResponse = response
            .parse()
            .map_err(|e| RefreshError::InvalidToken(e.to_string()))?;
        Credential::parse(body.access, CredentialOrigin::Refreshed)
            .map_err(|e| RefreshError::InvalidToken(e.to_string()))
    }

    /// The one teardown path: memory credential, durable token, cached
    /// profile, cookie jar, background loop, then `LoggedOut`.
    fn end_session(&self, reason: LogoutReason) {
        let _guard = self.teardown.lock().unwrap_or_else(PoisonError::into_inner);
        let had_session = self.credentials.get().is_some()
            || self.credentials.read_persisted().is_some()
            || self.profile.get().is_some();

        self.stop_refresh_loop();
        self.forget_in_flight();
        self.credentials.clear_persisted();
        self.profile.clear();
        self.transport.clear_cookies();

        if had_session || reason == LogoutReason::UserRequested {
            info!(?reason, "Session ended");
            self.publish(SessionEvent::LoggedOut(reason));
        }
    }

    fn forget_in_flight(&self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn publish(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn start_refresh_loop(self: &Arc<Self>) {
        let handle = spawn_refresh_loop(Arc::downgrade(self));
        let previous = self
            .refresh_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn stop_refresh_loop(&self) {
        let handle = self
            .refresh_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            debug!("Stopping background refresh loop");
            handle.abort();
        }
    }
}

impl Drop for GatewayInner {
    fn drop(&mut self) {
        self.stop_refresh_loop();
    }
}

/// Ticks every [`REFRESH_INTERVAL`], first tick one period after start.
/// Holds only a weak reference so a dropped gateway ends the loop.
fn spawn_refresh_loop(inner: Weak<GatewayInner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + REFRESH_INTERVAL, REFRESH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let gateway = ApiGateway { inner };
            match gateway.refresh_if_needed().await {
                Some(Ok(_)) => debug!("Background refresh succeeded"),
                Some(Err(e)) => warn!(error = %e, "Background refresh failed"),
                None => {}
            }
        }
    })
}
