//! sessionsync core library.
//!
//! Client-side session lifecycle for an application that may be open in
//! several tabs at once: short-lived access tokens refreshed through an
//! identity provider, a session persisted across two storage tiers,
//! authenticated HTTP and GraphQL calls, and propagation of logout and
//! profile changes between tabs.
//!
//! A tab is wired up as:
//!
//! ```no_run
//! use std::sync::Arc;
//! use sessionsync_core::{
//!     ApiClient, Config, CrossTabSync, GoTrueProvider, LogRedirect, MemoryStorage,
//!     RequestAuthenticator, SessionStore, SharedStorage,
//! };
//!
//! # async fn wire() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let shared = SharedStorage::open(config.durable_storage_path()?)?;
//! let durable = Arc::new(shared.tab());
//! let identity = Arc::new(GoTrueProvider::new(&config, durable.clone())?);
//! let store = Arc::new(SessionStore::new(
//!     &config,
//!     Arc::new(MemoryStorage::new()),
//!     durable.clone(),
//!     identity,
//! )?);
//! store.restore_session();
//!
//! let redirect = Arc::new(LogRedirect::new(config.login_path.clone()));
//! let _sync = Arc::new(CrossTabSync::new(store.clone(), durable, redirect.clone())).spawn();
//! let api = ApiClient::new(&config, RequestAuthenticator::new(store, redirect))?;
//! let _me: serde_json::Value = api.get("/api/me").await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod identity;
pub mod models;
pub mod storage;

pub use api::{ApiClient, ApiError, GraphQlClient, RequestAuthenticator};
pub use auth::{
    AuthError, CrossTabSync, DeviceEnvironment, LogRedirect, LoginRedirect, SessionEvent,
    SessionState, SessionStore, SyncEvent,
};
pub use config::Config;
pub use identity::{GoTrueProvider, IdentityError, IdentityProvider, RefreshedSession};
pub use models::*;
pub use storage::{MemoryStorage, SharedStorage, Storage, StorageError, TabStorage};
