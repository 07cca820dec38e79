//! Data models for the session subsystem.
//!
//! - `UserProfile`, `UserPreferences`: the durable user record
//! - `ProfileUpdate`, `PreferencesUpdate`: partial records for shallow merges
//! - `LoginRequest`, `LoginResponse`, `Session`: the login exchange and the
//!   tab-scoped session it creates

pub mod session;
pub mod user;

pub use session::{LoginRequest, LoginResponse, Session};
pub use user::{Language, PreferencesUpdate, ProfileUpdate, Theme, UserPreferences, UserProfile};
