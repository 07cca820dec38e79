//! Cross-tab session synchronization.
//!
//! Every tab of an origin shares the durable storage tier. A write in one
//! tab reaches the others as a `StorageEvent`, which is decoded here into
//! a typed `SyncEvent` and applied to the receiving tab's `SessionStore`:
//!
//! | key                 | change       | effect                                 |
//! |---------------------|--------------|----------------------------------------|
//! | `ae_user`           | removed      | clear session, redirect to login       |
//! | `ae_user`           | set          | merge profile (bad JSON is ignored)    |
//! | `ae_revoked_tokens` | any          | clear session, redirect to login       |
//! | `ae_user_prefs`     | any          | merge preferences (removed = no-op)    |

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::redirect::LoginRedirect;
use super::session::SessionStore;
use crate::models::{PreferencesUpdate, ProfileUpdate, UserPreferences, UserProfile};
use crate::storage::{keys, Storage, StorageError, StorageEvent, TabStorage};

/// What told this tab that the session is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationSource {
    ProfileRemoved,
    RevocationMarker,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    ProfileChanged(ProfileUpdate),
    PreferencesChanged(PreferencesUpdate),
    SessionRevoked(RevocationSource),
}

impl SyncEvent {
    /// Decode a raw storage change. Keys this module does not own, and
    /// payloads that fail to parse, yield `None`.
    pub fn from_storage_event(event: &StorageEvent) -> Option<Self> {
        match event.key.as_str() {
            keys::USER => match &event.new_value {
                None => Some(SyncEvent::SessionRevoked(RevocationSource::ProfileRemoved)),
                Some(raw) => match serde_json::from_str::<ProfileUpdate>(raw) {
                    Ok(update) => Some(SyncEvent::ProfileChanged(update)),
                    Err(e) => {
                        warn!(error = %e, "Failed to sync user profile");
                        None
                    }
                },
            },
            keys::REVOKED_TOKENS => Some(SyncEvent::SessionRevoked(RevocationSource::RevocationMarker)),
            keys::USER_PREFS => {
                let raw = event.new_value.as_deref().unwrap_or("{}");
                match serde_json::from_str::<PreferencesUpdate>(raw) {
                    Ok(update) => Some(SyncEvent::PreferencesChanged(update)),
                    Err(e) => {
                        warn!(error = %e, "Failed to sync user preferences");
                        None
                    }
                }
            }
            _ => None,
        }
    }
}

/// Listener and broadcaster for one tab.
pub struct CrossTabSync {
    store: Arc<SessionStore>,
    storage: Arc<TabStorage>,
    redirect: Arc<dyn LoginRedirect>,
}

impl CrossTabSync {
    /// `storage` must be the same durable handle the store writes through
    pub fn new(
        store: Arc<SessionStore>,
        storage: Arc<TabStorage>,
        redirect: Arc<dyn LoginRedirect>,
    ) -> Self {
        Self {
            store,
            storage,
            redirect,
        }
    }

    pub fn handle_storage_event(&self, event: &StorageEvent) {
        if let Some(sync_event) = SyncEvent::from_storage_event(event) {
            self.apply(sync_event);
        }
    }

    pub fn apply(&self, event: SyncEvent) {
        match event {
            SyncEvent::SessionRevoked(source) => {
                // broadcast_logout writes twice; only the first one lands
                if !self.store.has_session_data() {
                    debug!(?source, "Revocation ignored, no local session");
                    return;
                }
                info!(?source, "Session revoked in another tab");
                self.store.clear_session();
                self.redirect.redirect_to_login();
            }
            SyncEvent::ProfileChanged(update) => {
                if let Err(e) = self.store.update_user_profile(update) {
                    warn!(error = %e, "Failed to apply synced profile");
                }
            }
            SyncEvent::PreferencesChanged(update) => {
                if update.is_empty() {
                    return;
                }
                if let Err(e) = self.store.update_user_preferences(update) {
                    warn!(error = %e, "Failed to apply synced preferences");
                }
            }
        }
    }

    /// Tell every other tab to sign out. Does not touch this tab's session.
    pub fn broadcast_logout(&self) -> Result<(), StorageError> {
        let marker = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
        self.storage.set_item(keys::REVOKED_TOKENS, &marker)?;
        self.storage.remove_item(keys::USER)
    }

    pub fn broadcast_user_update(&self, user: &UserProfile) -> Result<(), StorageError> {
        let json = serde_json::to_string(user)?;
        self.storage.set_item(keys::USER, &json)
    }

    pub fn broadcast_prefs_update(&self, prefs: &UserPreferences) -> Result<(), StorageError> {
        let json = serde_json::to_string(prefs)?;
        self.storage.set_item(keys::USER_PREFS, &json)
    }

    /// Run the listener on the tokio runtime until the handle is stopped or
    /// dropped, which aborts the task. Changes made after this call returns
    /// are observed.
    pub fn spawn(self: Arc<Self>) -> SyncHandle {
        let mut events = self.storage.subscribe();
        let tab = self.storage.id();
        let task = tokio::spawn(async move {
            debug!(tab = tab, "Cross-tab sync started");
            while let Some(event) = events.recv().await {
                self.handle_storage_event(&event);
            }
        });
        SyncHandle { task }
    }
}

/// Stops the listener when dropped
pub struct SyncHandle {
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Tests
// ============================================================================
