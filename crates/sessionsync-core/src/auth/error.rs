use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Refresh failed; the caller must send the user back to login
    #[error("Session expired - please log in again")]
    SessionExpired,

    /// Bad credentials or backend rejection, surfaced to the user as-is
    #[error("{message}")]
    Login { message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuthError {
    pub fn login(message: impl Into<String>) -> Self {
        AuthError::Login {
            message: message.into(),
        }
    }
}
