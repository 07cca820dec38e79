//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};

use sessionsync_core::{
    Config, IdentityError, IdentityProvider, LoginRedirect, LoginResponse, MemoryStorage,
    RefreshedSession, SessionStore,
};

/// Unsigned JWT expiring `exp_in_secs` from now
pub fn make_token(exp_in_secs: i64) -> String {
    let exp = Utc::now().timestamp() + exp_in_secs;
    let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": "u-1", "exp": exp }).to_string());
    format!("eyJhbGciOiJIUzI1NiJ9.{}.signature", payload)
}

pub fn login_body(token: &str) -> Value {
    json!({
        "access_token": token,
        "session_id": "s-1",
        "expires_in": 3600,
        "user": {
            "id": "u-1",
            "email": "ana@example.com",
            "name": "Ana",
            "preferences": {"theme": "dark", "language": "pt-BR", "notifications_enabled": false},
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-02-01T00:00:00Z"
        }
    })
}

pub fn login_response(token: &str) -> LoginResponse {
    serde_json::from_value(login_body(token)).unwrap()
}

#[derive(Default)]
pub struct MockIdentity {
    pub refreshed_token: Option<String>,
    pub refresh_calls: AtomicUsize,
    pub sign_out_calls: AtomicUsize,
}

impl MockIdentity {
    pub fn refreshing_to(token: String) -> Self {
        Self {
            refreshed_token: Some(token),
            ..Self::default()
        }
    }
}

#[async_trait]
impl IdentityProvider for MockIdentity {
    async fn refresh_session(&self) -> Result<RefreshedSession, IdentityError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refreshed_token
            .clone()
            .map(|access_token| RefreshedSession {
                access_token,
                refresh_token: None,
                expires_in: None,
            })
            .ok_or(IdentityError::NotSignedIn)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RedirectCounter(AtomicUsize);

impl RedirectCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl LoginRedirect for RedirectCounter {
    fn redirect_to_login(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Fixture {
    pub config: Config,
    pub store: Arc<SessionStore>,
    pub short_lived: Arc<MemoryStorage>,
    pub durable: Arc<MemoryStorage>,
    pub identity: Arc<MockIdentity>,
    pub redirect: Arc<RedirectCounter>,
}

pub fn fixture(base_url: &str, identity: MockIdentity) -> Fixture {
    let config = Config::for_base_url(base_url);
    let short_lived = Arc::new(MemoryStorage::new());
    let durable = Arc::new(MemoryStorage::new());
    let identity = Arc::new(identity);
    let store = Arc::new(
        SessionStore::new(&config, short_lived.clone(), durable.clone(), identity.clone())
            .unwrap(),
    );
    Fixture {
        config,
        store,
        short_lived,
        durable,
        identity,
        redirect: Arc::new(RedirectCounter::default()),
    }
}
