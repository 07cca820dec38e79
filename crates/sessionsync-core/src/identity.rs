//! Identity provider collaborator.
//!
//! The session store only needs two operations from the provider: refresh
//! the current session and sign out. `IdentityProvider` is that seam;
//! `GoTrueProvider` implements it over HTTP against a GoTrue-style auth
//! server, keeping its own `{access_token, refresh_token}` pair in the
//! durable storage tier the way the hosted auth SDK persists its session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::storage::{keys, Storage, StorageError};

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Identity provider unreachable: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Identity provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Identity provider response carried no access token")]
    MissingToken,

    #[error("No identity provider session to refresh")]
    NotSignedIn,

    #[error("Identity provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Identity session storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result of a successful refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshedSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn refresh_session(&self) -> Result<RefreshedSession, IdentityError>;

    async fn sign_out(&self) -> Result<(), IdentityError>;
}

/// The provider's own persisted session
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredIdentitySession {
    access_token: String,
    refresh_token: String,
}

/// Token endpoint body. Every field is optional so a body missing the
/// access token is reported as `MissingToken` rather than a parse error.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "error_description", alias = "msg")]
    message: Option<String>,
}

/// HTTP identity provider speaking the GoTrue token/logout API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct GoTrueProvider {
    client: Client,
    base_url: String,
    anon_key: String,
    storage: Arc<dyn Storage>,
}

impl GoTrueProvider {
    pub fn new(config: &Config, storage: Arc<dyn Storage>) -> Result<Self, IdentityError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.identity_url.trim_end_matches('/').to_string(),
            anon_key: config.identity_anon_key.clone(),
            storage,
        })
    }

    /// Seed the provider session, e.g. after a login that returned a refresh token
    pub fn store_session(&self, access_token: &str, refresh_token: &str) -> Result<(), IdentityError> {
        let stored = StoredIdentitySession {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
        };
        let json = serde_json::to_string(&stored).map_err(StorageError::from)?;
        self.storage.set_item(keys::IDENTITY_SESSION, &json)?;
        Ok(())
    }

    pub fn has_session(&self) -> bool {
        self.stored_session().is_some()
    }

    fn stored_session(&self) -> Option<StoredIdentitySession> {
        let raw = self.storage.get_item(keys::IDENTITY_SESSION)?;
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable identity session");
                None
            }
        }
    }

    async fn rejection(response: reqwest::Response) -> IdentityError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(body);
        IdentityError::Rejected { status, message }
    }
}

#[async_trait]
impl IdentityProvider for GoTrueProvider {
    async fn refresh_session(&self) -> Result<RefreshedSession, IdentityError> {
        let stored = self.stored_session().ok_or(IdentityError::NotSignedIn)?;
        let url = format!("{}/auth/v1/token?grant_type=refresh_token", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "refresh_token": stored.refresh_token }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let body: TokenResponse = response.json().await?;
        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(IdentityError::MissingToken)?;

        // Refresh tokens rotate; keep the old one if none was issued
        let refresh_token = body.refresh_token.unwrap_or(stored.refresh_token);
        self.store_session(&access_token, &refresh_token)?;
        debug!("Identity provider session refreshed");

        Ok(RefreshedSession {
            access_token,
            refresh_token: Some(refresh_token),
            expires_in: body.expires_in,
        })
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        let stored = match self.stored_session() {
            Some(stored) => stored,
            None => return Ok(()),
        };

        // The local copy goes regardless of what the server says
        self.storage.remove_item(keys::IDENTITY_SESSION)?;

        let url = format!("{}/auth/v1/logout", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .header(header::AUTHORIZATION, format!("Bearer {}", stored.access_token))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(())
    }
}
