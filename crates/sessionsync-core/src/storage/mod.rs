//! Two-tier key/value storage backing the session.
//!
//! This module provides:
//! - `Storage`: the get/set/remove contract shared by both tiers
//! - `MemoryStorage`: short-lived storage owned by a single tab
//! - `SharedStorage` / `TabStorage`: durable storage shared by every tab
//!   of an origin, optionally persisted to disk, which notifies the
//!   *other* tabs of each change
//!
//! Keys are plain strings and values are opaque strings (JSON where the
//! value is structured), matching the browser Web Storage model.

pub mod memory;
pub mod shared;

use thiserror::Error;

pub use memory::MemoryStorage;
pub use shared::{SharedStorage, StorageEvent, StorageEvents, TabId, TabStorage};

/// Storage key constants. Stable across versions: other tabs and earlier
/// releases read the same names.
pub mod keys {
    // Short-lived tier
    pub const ACCESS_TOKEN: &str = "ae_at";
    pub const SESSION_ID: &str = "ae_sid";
    pub const LOGIN_AT: &str = "ae_login_at";

    // Durable tier
    pub const USER: &str = "ae_user";
    pub const USER_PREFS: &str = "ae_user_prefs";
    pub const DEVICE_FINGERPRINT: &str = "ae_device_fp";
    pub const REVOKED_TOKENS: &str = "ae_revoked_tokens";
    pub const IDENTITY_SESSION: &str = "ae_idp_session";
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A string key/value store.
///
/// Every write is a discrete, independently observable change; there is
/// no multi-key transaction.
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}
