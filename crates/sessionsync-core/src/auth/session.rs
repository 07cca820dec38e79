//! The per-tab session store.
//!
//! `SessionStore` is the single authoritative session for one tab. It owns
//! the in-memory state and keeps two storage tiers in step with it:
//!
//! - short-lived (tab-scoped): access token, session id, login time
//! - durable (origin-scoped): user profile, preferences, device fingerprint
//!
//! Clearing a session only touches the short-lived tier. The durable profile
//! is kept so the next login can be pre-filled.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::fingerprint::DeviceEnvironment;
use super::token;
use super::AuthError;
use crate::config::Config;
use crate::identity::{IdentityError, IdentityProvider};
use crate::models::{
    LoginRequest, LoginResponse, PreferencesUpdate, ProfileUpdate, Session, Theme, UserProfile,
};
use crate::storage::{keys, Storage, StorageError};

// ============================================================================
// Constants
// ============================================================================

/// Message recorded when a refresh fails and the user must log in again
const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please log in again.";

/// Message used when the backend rejects a login without saying why
const LOGIN_FAILED_MESSAGE: &str = "Login failed";

/// Message used when the email is not shaped like an address
const INVALID_EMAIL_MESSAGE: &str = "Invalid email address";

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Refreshing,
}

/// Lifecycle notifications for in-process observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    TokenRefreshed,
    Cleared,
    ProfileUpdated,
    PreferencesUpdated,
}

#[derive(Debug, Deserialize)]
struct LoginErrorBody {
    message: Option<String>,
}

struct SessionInner {
    access_token: Option<String>,
    session_id: Option<String>,
    login_at: Option<DateTime<Utc>>,
    user: Option<UserProfile>,
    state: SessionState,
    error: Option<String>,
    is_loading: bool,
}

impl Default for SessionInner {
    fn default() -> Self {
        Self {
            access_token: None,
            session_id: None,
            login_at: None,
            user: None,
            state: SessionState::Unauthenticated,
            error: None,
            is_loading: false,
        }
    }
}

pub struct SessionStore {
    short_lived: Arc<dyn Storage>,
    durable: Arc<dyn Storage>,
    identity: Arc<dyn IdentityProvider>,
    client: Client,
    login_url: String,
    device: DeviceEnvironment,
    skew_secs: i64,
    refresh_timeout: Option<Duration>,
    inner: Mutex<SessionInner>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    /// Create an empty store. Call `restore_session` to pick up state left
    /// in storage by an earlier run of this tab.
    pub fn new(
        config: &Config,
        short_lived: Arc<dyn Storage>,
        durable: Arc<dyn Storage>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, AuthError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            short_lived,
            durable,
            identity,
            client,
            login_url: config.login_url(),
            device: DeviceEnvironment::detect(),
            skew_secs: config.token_skew_secs,
            refresh_timeout: config.refresh_timeout(),
            inner: Mutex::new(SessionInner::default()),
            events,
        })
    }

    /// Use a fixed device description instead of the detected one
    pub fn with_device(mut self, device: DeviceEnvironment) -> Self {
        self.device = device;
        self
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ===== Lifecycle =====

    /// Install the result of a successful login
    pub fn set_session(&self, response: LoginResponse) -> Result<(), AuthError> {
        let now = Utc::now();
        let user_json = serde_json::to_string(&response.user)?;
        let prefs_json = serde_json::to_string(&response.user.preferences)?;
        let email = response.user.email.clone();

        // Memory is only committed once every write has landed
        if let Err(e) = self.persist_session(&response, now, &user_json, &prefs_json) {
            for key in [keys::ACCESS_TOKEN, keys::SESSION_ID, keys::LOGIN_AT] {
                let _ = self.short_lived.remove_item(key);
            }
            warn!(user = %email, error = %e, "Failed to store session");
            return Err(e.into());
        }

        {
            let mut inner = self.inner();
            inner.access_token = Some(response.access_token);
            inner.session_id = Some(response.session_id);
            inner.login_at = Some(now);
            inner.user = Some(response.user);
            inner.state = SessionState::Authenticated;
            inner.error = None;
        }

        info!(user = %email, expires_in = response.expires_in, "Session established");
        self.emit(SessionEvent::SignedIn);
        Ok(())
    }

    fn persist_session(
        &self,
        response: &LoginResponse,
        now: DateTime<Utc>,
        user_json: &str,
        prefs_json: &str,
    ) -> Result<(), StorageError> {
        // Tab-scoped
        self.short_lived.set_item(keys::ACCESS_TOKEN, &response.access_token)?;
        self.short_lived.set_item(keys::SESSION_ID, &response.session_id)?;
        self.short_lived
            .set_item(keys::LOGIN_AT, &now.to_rfc3339_opts(SecondsFormat::Millis, true))?;

        // Durable
        self.durable.set_item(keys::USER, user_json)?;
        self.durable.set_item(keys::USER_PREFS, prefs_json)?;
        self.durable
            .set_item(keys::DEVICE_FINGERPRINT, &self.device.fingerprint())
    }

    /// Return a token that is not about to expire, refreshing through the
    /// identity provider if needed. A failed refresh clears the session and
    /// returns `SessionExpired`.
    pub async fn get_valid_token(&self) -> Result<String, AuthError> {
        let current = self.inner().access_token.clone();
        if let Some(token) = current {
            if !token::is_expired_with_skew(&token, self.skew_secs) {
                return Ok(token);
            }
        }

        self.inner().state = SessionState::Refreshing;
        debug!("Access token missing or expiring, refreshing");

        match self.refresh().await {
            Ok(token) => Ok(token),
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                self.clear_session();
                self.inner().error = Some(SESSION_EXPIRED_MESSAGE.to_string());
                Err(AuthError::SessionExpired)
            }
        }
    }

    async fn refresh(&self) -> Result<String, IdentityError> {
        let refreshed = self.bounded(self.identity.refresh_session()).await?;
        let token = refreshed.access_token;
        if token.is_empty() {
            return Err(IdentityError::MissingToken);
        }

        self.short_lived.set_item(keys::ACCESS_TOKEN, &token)?;
        {
            let mut inner = self.inner();
            inner.access_token = Some(token.clone());
            inner.state = SessionState::Authenticated;
        }

        debug!(remaining_secs = token::time_remaining(&token), "Access token refreshed");
        self.emit(SessionEvent::TokenRefreshed);
        Ok(token)
    }

    /// Apply the configured bound to an identity-provider round trip
    async fn bounded<T, F>(&self, call: F) -> Result<T, IdentityError>
    where
        F: Future<Output = Result<T, IdentityError>>,
    {
        match self.refresh_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| IdentityError::Timeout(limit))?,
            None => call.await,
        }
    }

    /// Post credentials to the backend and install the resulting session
    pub async fn login(&self, credentials: &LoginRequest) -> Result<(), AuthError> {
        {
            let mut inner = self.inner();
            inner.is_loading = true;
            inner.error = None;
        }

        let result = self.try_login(credentials).await;

        {
            let mut inner = self.inner();
            inner.is_loading = false;
            if let Err(ref e) = result {
                inner.error = Some(e.to_string());
            }
        }
        result
    }

    async fn try_login(&self, credentials: &LoginRequest) -> Result<(), AuthError> {
        if !is_valid_email(&credentials.email) {
            return Err(AuthError::login(INVALID_EMAIL_MESSAGE));
        }

        let response = self
            .client
            .post(&self.login_url)
            .json(credentials)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<LoginErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| LOGIN_FAILED_MESSAGE.to_string());
            warn!(status = %status, "Login rejected");
            return Err(AuthError::login(message));
        }

        let body = response.text().await?;
        let login: LoginResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::InvalidResponse(format!("Failed to parse login response: {}", e))
        })?;

        self.set_session(login)
    }

    /// Sign out everywhere. Never fails: the provider sign-out is best
    /// effort and the local session is cleared regardless.
    pub async fn logout(&self) {
        if let Err(e) = self.bounded(self.identity.sign_out()).await {
            warn!(error = %e, "Identity provider sign-out failed");
        }

        // Tell other tabs
        let marker = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        if let Err(e) = self.durable.set_item(keys::REVOKED_TOKENS, &marker) {
            warn!(error = %e, "Failed to write revocation marker");
        }

        self.clear_session();
        info!("Logged out");
    }

    /// Drop the session from memory and the short-lived tier.
    /// The durable profile and preferences are left in place.
    pub fn clear_session(&self) {
        {
            let mut inner = self.inner();
            inner.access_token = None;
            inner.session_id = None;
            inner.login_at = None;
            inner.user = None;
            inner.error = None;
            inner.state = SessionState::Unauthenticated;
        }

        for key in [keys::ACCESS_TOKEN, keys::SESSION_ID, keys::LOGIN_AT] {
            if let Err(e) = self.short_lived.remove_item(key) {
                warn!(key = key, error = %e, "Failed to remove session entry");
            }
        }

        debug!("Session cleared");
        self.emit(SessionEvent::Cleared);
    }

    /// Reload a session left in storage. Returns whether the tab ends up
    /// authenticated. Does nothing when no complete session is stored.
    pub fn restore_session(&self) -> bool {
        let stored = (
            self.short_lived.get_item(keys::ACCESS_TOKEN),
            self.short_lived.get_item(keys::SESSION_ID),
            self.durable.get_item(keys::USER),
        );
        let (Some(token), Some(session_id), Some(user_json)) = stored else {
            debug!("No stored session to restore");
            return false;
        };

        let user: UserProfile = match serde_json::from_str(&user_json) {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "Stored user profile is unreadable, not restoring");
                return false;
            }
        };

        let login_at = self
            .short_lived
            .get_item(keys::LOGIN_AT)
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc));

        let expired = token::is_expired_with_skew(&token, self.skew_secs);
        {
            let mut inner = self.inner();
            inner.access_token = Some(token);
            inner.session_id = Some(session_id);
            inner.login_at = login_at;
            inner.user = Some(user);
            inner.state = SessionState::Authenticated;
        }

        if expired {
            debug!("Restored token already expired, clearing");
            self.clear_session();
            return false;
        }

        info!("Session restored");
        true
    }

    /// Token, profile and session id all present and the token not expiring.
    /// Never refreshes.
    pub fn is_session_valid(&self) -> bool {
        let inner = self.inner();
        match (&inner.access_token, &inner.user, &inner.session_id) {
            (Some(token), Some(_), Some(_)) => !token::is_expired_with_skew(token, self.skew_secs),
            _ => false,
        }
    }

    // ===== Profile =====

    /// Shallow-merge into the loaded profile. No-op without a user.
    pub fn update_user_profile(&self, update: ProfileUpdate) -> Result<(), AuthError> {
        let (user_json, prefs_json) = {
            let mut inner = self.inner();
            let Some(user) = inner.user.as_mut() else {
                debug!("No user loaded, ignoring profile update");
                return Ok(());
            };

            let prefs_changed = update.preferences.is_some();
            user.apply(update);
            let prefs_json = if prefs_changed {
                Some(serde_json::to_string(&user.preferences)?)
            } else {
                None
            };
            (serde_json::to_string(&*user)?, prefs_json)
        };

        self.durable.set_item(keys::USER, &user_json)?;
        if let Some(prefs_json) = prefs_json {
            self.durable.set_item(keys::USER_PREFS, &prefs_json)?;
        }
        self.emit(SessionEvent::ProfileUpdated);
        Ok(())
    }

    /// Shallow-merge into the loaded preferences. No-op without a user.
    pub fn update_user_preferences(&self, update: PreferencesUpdate) -> Result<(), AuthError> {
        let (prefs_json, user_json) = {
            let mut inner = self.inner();
            let Some(user) = inner.user.as_mut() else {
                debug!("No user loaded, ignoring preferences update");
                return Ok(());
            };

            user.preferences.apply(update);
            (
                serde_json::to_string(&user.preferences)?,
                serde_json::to_string(&*user)?,
            )
        };

        self.durable.set_item(keys::USER_PREFS, &prefs_json)?;
        self.durable.set_item(keys::USER, &user_json)?;
        self.emit(SessionEvent::PreferencesUpdated);
        Ok(())
    }

    // ===== Accessors =====

    /// A non-expiring token and a profile are both present
    pub fn is_authenticated(&self) -> bool {
        let inner = self.inner();
        match (&inner.access_token, &inner.user) {
            (Some(token), Some(_)) => !token::is_expired_with_skew(token, self.skew_secs),
            _ => false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner().state
    }

    pub fn session(&self) -> Option<Session> {
        let inner = self.inner();
        Some(Session {
            access_token: inner.access_token.clone()?,
            session_id: inner.session_id.clone()?,
            login_at: inner.login_at?,
        })
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner().access_token.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner().session_id.clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner().user.clone()
    }

    pub fn user_email(&self) -> Option<String> {
        self.inner().user.as_ref().map(|u| u.email.clone())
    }

    pub fn user_name(&self) -> Option<String> {
        self.inner().user.as_ref().map(|u| u.name.clone())
    }

    pub fn user_theme(&self) -> Theme {
        self.inner()
            .user
            .as_ref()
            .map(|u| u.preferences.theme)
            .unwrap_or_default()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner().is_loading
    }

    /// Profile kept in the durable tier, even when signed out
    pub fn stored_profile(&self) -> Option<UserProfile> {
        let raw = self.durable.get_item(keys::USER)?;
        serde_json::from_str(&raw).ok()
    }

    /// Anything left from a signed-in period, expired or not
    pub(crate) fn has_session_data(&self) -> bool {
        let inner = self.inner();
        inner.access_token.is_some() || inner.session_id.is_some() || inner.user.is_some()
    }
}

/// `local@domain.tld` shape check: one `@`, no whitespace, a dot inside the domain
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain
                    .char_indices()
                    .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
        }
        _ => false,
    }
}

// ============================================================================
// Tests
// ============================================================================
