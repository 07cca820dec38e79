use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::{LoginRedirect, SessionStore};

/// Header carrying the backend session id on every request
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Request policy shared by every outbound client.
/// Clone is cheap - both fields are `Arc`s.
#[derive(Clone)]
pub struct RequestAuthenticator {
    store: Arc<SessionStore>,
    redirect: Arc<dyn LoginRedirect>,
}

impl RequestAuthenticator {
    pub fn new(store: Arc<SessionStore>, redirect: Arc<dyn LoginRedirect>) -> Self {
        Self { store, redirect }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Headers for an outgoing request. Never fails: when no token can be
    /// obtained the request goes out without one and the server decides.
    pub async fn before_send(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        match self.store.get_valid_token().await {
            Ok(token) => match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(value) => {
                    headers.insert(header::AUTHORIZATION, value);
                }
                Err(e) => warn!(error = %e, "Access token is not a valid header value"),
            },
            Err(e) => debug!(error = %e, "Sending request without a token"),
        }

        if let Some(session_id) = self.store.session_id() {
            match HeaderValue::from_str(&session_id) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static(SESSION_ID_HEADER), value);
                }
                Err(e) => warn!(error = %e, "Session id is not a valid header value"),
            }
        }

        headers
    }

    /// The server no longer accepts this session
    pub fn on_unauthorized(&self) {
        warn!("Request unauthorized, clearing session");
        self.store.clear_session();
        self.redirect.redirect_to_login();
    }

    /// Classify a completed response. 401 drops the session; 403 leaves it alone.
    pub fn after_response(&self, status: StatusCode, body: &str) -> Result<(), ApiError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(self.failure(status, body))
        }
    }

    /// Check if response is successful, returning an error with body if not.
    pub async fn check_response(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(self.failure(status, &body))
    }

    fn failure(&self, status: StatusCode, body: &str) -> ApiError {
        match status {
            StatusCode::UNAUTHORIZED => {
                self.on_unauthorized();
                ApiError::Unauthorized
            }
            StatusCode::FORBIDDEN => {
                warn!("Access denied");
                ApiError::from_status(status, body)
            }
            _ => ApiError::from_status(status, body),
        }
    }
}
