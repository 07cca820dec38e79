//! Integration tests for login, refresh and logout against mock servers

mod common;

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{fixture, login_body, login_response, make_token, MockIdentity};
use sessionsync_core::storage::keys;
use sessionsync_core::{
    AuthError, Config, GoTrueProvider, IdentityError, IdentityProvider, LoginRequest,
    MemoryStorage, SessionEvent, SessionState, SessionStore, Storage, Theme,
};

#[tokio::test]
async fn test_login_success_installs_session() {
    let mock_server = MockServer::start().await;
    let token = make_token(3600);

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({"email": "ana@example.com", "password": "secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body(&token)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fx = fixture(&mock_server.uri(), MockIdentity::default());
    let mut events = fx.store.subscribe();

    fx.store
        .login(&LoginRequest::new("ana@example.com", "secret"))
        .await
        .unwrap();

    assert!(fx.store.is_authenticated());
    assert!(fx.store.is_session_valid());
    assert_eq!(fx.store.state(), SessionState::Authenticated);
    assert_eq!(fx.store.user_theme(), Theme::Dark);
    assert_eq!(fx.store.last_error(), None);
    assert!(!fx.store.is_loading());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedIn);

    assert_eq!(fx.short_lived.get_item(keys::ACCESS_TOKEN), Some(token));
    assert_eq!(fx.short_lived.get_item(keys::SESSION_ID).as_deref(), Some("s-1"));
    assert!(fx.durable.get_item(keys::DEVICE_FINGERPRINT).is_some());
}

#[tokio::test]
async fn test_login_failure_surfaces_backend_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "Invalid credentials"})),
        )
        .mount(&mock_server)
        .await;

    let fx = fixture(&mock_server.uri(), MockIdentity::default());

    let result = fx
        .store
        .login(&LoginRequest::new("ana@example.com", "wrong"))
        .await;

    assert!(matches!(result, Err(AuthError::Login { ref message }) if message == "Invalid credentials"));
    assert_eq!(fx.store.last_error().as_deref(), Some("Invalid credentials"));
    assert!(!fx.store.is_authenticated());
    assert!(!fx.store.is_loading());
    assert!(fx.short_lived.is_empty());
}

#[tokio::test]
async fn test_login_failure_without_message_uses_generic_text() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .mount(&mock_server)
        .await;

    let fx = fixture(&mock_server.uri(), MockIdentity::default());

    let result = fx
        .store
        .login(&LoginRequest::new("ana@example.com", "secret"))
        .await;

    assert!(matches!(result, Err(AuthError::Login { ref message }) if message == "Login failed"));
}

#[tokio::test]
async fn test_login_with_malformed_body_is_invalid_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "x"})))
        .mount(&mock_server)
        .await;

    let fx = fixture(&mock_server.uri(), MockIdentity::default());

    let result = fx
        .store
        .login(&LoginRequest::new("ana@example.com", "secret"))
        .await;

    assert!(matches!(result, Err(AuthError::InvalidResponse(_))));
    assert!(!fx.store.is_authenticated());
}

// ============================================================================
// Identity provider
// ============================================================================

fn gotrue_store(base_url: &str) -> (Arc<SessionStore>, Arc<GoTrueProvider>, Arc<MemoryStorage>) {
    let config = Config {
        identity_anon_key: "anon-key".to_string(),
        ..Config::for_base_url(base_url)
    };
    let durable = Arc::new(MemoryStorage::new());
    let provider = Arc::new(GoTrueProvider::new(&config, durable.clone()).unwrap());
    let store = Arc::new(
        SessionStore::new(
            &config,
            Arc::new(MemoryStorage::new()),
            durable.clone(),
            provider.clone(),
        )
        .unwrap(),
    );
    (store, provider, durable)
}

#[tokio::test]
async fn test_refresh_through_identity_provider() {
    let mock_server = MockServer::start().await;
    let fresh = make_token(3600);

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .and(header("apikey", "anon-key"))
        .and(body_json(json!({"refresh_token": "r-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": fresh,
            "refresh_token": "r-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (store, provider, durable) = gotrue_store(&mock_server.uri());
    provider.store_session("old", "r-1").unwrap();
    store.set_session(login_response(&make_token(30))).unwrap();

    let token = store.get_valid_token().await.unwrap();

    assert_eq!(token, fresh);
    assert!(store.is_session_valid());
    let stored = durable.get_item(keys::IDENTITY_SESSION).unwrap();
    assert!(stored.contains("r-2"));
}

#[tokio::test]
async fn test_rejected_refresh_clears_session() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error_description": "Invalid Refresh Token"})),
        )
        .mount(&mock_server)
        .await;

    let (store, provider, durable) = gotrue_store(&mock_server.uri());
    provider.store_session("old", "r-1").unwrap();
    store.set_session(login_response(&make_token(10))).unwrap();

    let result = store.get_valid_token().await;

    assert!(matches!(result, Err(AuthError::SessionExpired)));
    assert_eq!(store.state(), SessionState::Unauthenticated);
    assert_eq!(store.last_error().as_deref(), Some("Session expired. Please log in again."));
    // Durable profile is kept for pre-fill
    assert!(durable.get_item(keys::USER).is_some());
}

#[tokio::test]
async fn test_provider_reports_rejection_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"msg": "expired"})))
        .mount(&mock_server)
        .await;

    let (_store, provider, _durable) = gotrue_store(&mock_server.uri());
    provider.store_session("old", "r-1").unwrap();

    let result = provider.refresh_session().await;

    assert!(matches!(
        result,
        Err(IdentityError::Rejected { status: 401, ref message }) if message == "expired"
    ));
}

#[tokio::test]
async fn test_provider_without_session_cannot_refresh() {
    let mock_server = MockServer::start().await;
    let (_store, provider, _durable) = gotrue_store(&mock_server.uri());

    assert!(matches!(provider.refresh_session().await, Err(IdentityError::NotSignedIn)));
    assert!(provider.sign_out().await.is_ok());
}

#[tokio::test]
async fn test_logout_signs_out_and_writes_revocation_marker() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .and(header("authorization", "Bearer idp-access"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (store, provider, durable) = gotrue_store(&mock_server.uri());
    provider.store_session("idp-access", "r-1").unwrap();
    store.set_session(login_response(&make_token(3600))).unwrap();

    store.logout().await;

    assert!(!store.is_authenticated());
    assert!(!provider.has_session());
    assert!(durable.get_item(keys::REVOKED_TOKENS).is_some());
    assert!(store.stored_profile().is_some());
}

#[tokio::test]
async fn test_logout_clears_when_provider_is_down() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let (store, provider, durable) = gotrue_store(&mock_server.uri());
    provider.store_session("idp-access", "r-1").unwrap();
    store.set_session(login_response(&make_token(3600))).unwrap();

    store.logout().await;

    assert!(!store.is_authenticated());
    assert!(durable.get_item(keys::REVOKED_TOKENS).is_some());
}
