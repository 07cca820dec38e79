//! Session lifecycle for a single tab.
//!
//! This module provides:
//! - `token`: unverified JWT payload decoding and expiry checks
//! - `fingerprint`: the stable, non-cryptographic device identifier
//! - `SessionStore`: the authoritative session, persisted in two tiers
//! - `CrossTabSync`: propagation of logout and profile changes between tabs
//! - `LoginRedirect`: the "send the user to login" callback

pub mod error;
pub mod fingerprint;
pub mod redirect;
pub mod session;
pub mod sync;
pub mod token;

pub use error::AuthError;
pub use fingerprint::DeviceEnvironment;
pub use redirect::{LogRedirect, LoginRedirect};
pub use session::{SessionEvent, SessionState, SessionStore};
pub use sync::{CrossTabSync, RevocationSource, SyncEvent, SyncHandle};
