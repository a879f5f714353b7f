//! HTTP adapters against a local mock server.
//!
//! Exercises the reqwest-backed identity provider, exchange client and
//! profile store end to end, and a full controller built from config with
//! file storage in a temp directory.

use std::sync::Arc;

use civic_auth::adapters::{HttpIdentityProvider, HttpProfileStore, ReqwestHttpClient};
use civic_auth::auth::{AuthSessionController, AuthStatus, ClaimSet, TokenExchangeClient, TokenType};
use civic_auth::config::AuthConfig;
use civic_auth::error::{AuthError, ErrorKind};
use civic_auth::traits::{HttpClient, IdentityProvider, ProfileStore};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ANON: &str = "anon-key";

fn http() -> Arc<dyn HttpClient> {
    Arc::new(ReqwestHttpClient::new())
}

fn token_body(access: &str, refresh: &str) -> serde_json::Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "expires_in": 3600,
        "user": {
            "id": "u-ada",
            "email": "ada@example.org",
            "email_confirmed_at": "2026-01-02T03:04:05Z",
            "role": "authenticated",
            "user_metadata": {}
        }
    })
}

// ============================================================================
// Identity provider
// ============================================================================

#[tokio::test]
async fn test_password_grant_builds_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .and(header("apikey", ANON))
        .and(body_partial_json(json!({ "email": "ada@example.org" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-1", "rt-1")))
        .expect(1)
        .mount(&server)
        .await;

    let provider = HttpIdentityProvider::new(http(), server.uri(), ANON);
    let response = provider
        .sign_in_with_password("ada@example.org", "correct-horse")
        .await
        .unwrap();

    assert_eq!(response.user.id, "u-ada");
    assert!(response.user.email_verified);
    let session = response.session.unwrap();
    assert_eq!(session.access_token, "at-1");
    assert_eq!(session.refresh_token, "rt-1");
    assert!(session.expires_at > chrono::Utc::now().timestamp());
}

#[tokio::test]
async fn test_provider_error_body_is_kept_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid login credentials"
        })))
        .mount(&server)
        .await;

    let provider = HttpIdentityProvider::new(http(), server.uri(), ANON);
    let err = provider
        .sign_in_with_password("ada@example.org", "wrong")
        .await
        .unwrap_err();
    assert_eq!(err.message, "Invalid login credentials");
    assert_eq!(err.status, Some(400));
    assert_eq!(err.code.as_deref(), Some("invalid_grant"));

    let err = AuthError::provider("sign_in", err);
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_magic_link_sends_challenge_and_redirect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/otp"))
        .and(query_param(
            "redirect_to",
            "https://app.example.org/auth/callback",
        ))
        .and(body_partial_json(json!({
            "email": "ada@example.org",
            "code_challenge": "challenge-abc",
            "code_challenge_method": "s256"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let provider = HttpIdentityProvider::new(http(), server.uri(), ANON);
    provider
        .send_magic_link(
            "ada@example.org",
            "challenge-abc",
            Some("https://app.example.org/auth/callback"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_provider_reads_as_network() {
    // Nothing listens on the port once the listener is dropped.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let provider = HttpIdentityProvider::new(http(), format!("http://127.0.0.1:{}", port), ANON);
    let err = provider.health().await.unwrap_err();
    assert_eq!(AuthError::provider("health", err).kind(), ErrorKind::Network);
}

// ============================================================================
// Exchange service and profile store
// ============================================================================

#[tokio::test]
async fn test_exchange_posts_claims_with_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/functions/v1/jwt-exchange"))
        .and(header("authorization", "Bearer at-1"))
        .and(body_partial_json(json!({
            "action": "exchange",
            "custom_claims": { "tier": "elevated" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "opaque-token",
            "expires_in": 600
        })))
        .mount(&server)
        .await;

    let client = TokenExchangeClient::new(
        http(),
        &format!("{}/functions/v1", server.uri()),
        "jwt-exchange",
        ANON,
    );
    let mut claims = ClaimSet::new();
    claims.insert("tier".to_string(), json!("elevated"));
    let token = client
        .exchange("at-1", &claims, TokenType::SessionExchange)
        .await
        .unwrap();

    assert_eq!(token.token, "opaque-token");
    assert_eq!(token.expires_at - token.issued_at, 600);
    assert_eq!(token.claims["tier"], "elevated");
    assert_eq!(token.claims["email_verified"], false);
}

#[tokio::test]
async fn test_exchange_rejection_is_token_kind() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/functions/v1/jwt-exchange"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "error": "Invalid provider token" })),
        )
        .mount(&server)
        .await;

    let client = TokenExchangeClient::new(
        http(),
        &format!("{}/functions/v1", server.uri()),
        "jwt-exchange",
        ANON,
    );
    let err = client.refresh("at-1", &ClaimSet::new()).await.unwrap_err();
    assert!(matches!(
        err,
        AuthError::ExchangeService { status: 401, ref message, .. } if message == "Invalid provider token"
    ));
    assert_eq!(err.kind(), ErrorKind::Token);
}

#[tokio::test]
async fn test_profile_fetch_reads_first_row() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", "eq.u-ada"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "u-ada",
            "display_name": "Ada",
            "tier": "premium",
            "notify_email": true
        }])))
        .mount(&server)
        .await;

    let store = HttpProfileStore::new(http(), server.uri(), ANON, "profiles");
    let profile = store.fetch("u-ada", "at-1").await.unwrap().unwrap();
    assert_eq!(profile.display_name.as_deref(), Some("Ada"));
    assert_eq!(profile.tier, civic_auth::auth::Tier::Elevated);
    assert!(profile.notify_email);
    assert!(!profile.is_complete());
}

// ============================================================================
// Full stack
// ============================================================================

async fn mount_backend(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-1", "rt-1")))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/functions/v1/jwt-exchange"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "enhanced-1",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
}

fn config_for(server: &MockServer, dir: &TempDir) -> AuthConfig {
    AuthConfig::new(server.uri(), ANON)
        .with_storage_dir(dir.path())
        .with_revalidate_on_restore(false)
}

#[tokio::test]
async fn test_session_survives_restart_on_disk() {
    let server = MockServer::start().await;
    mount_backend(&server).await;
    let dir = TempDir::new().unwrap();

    let controller = AuthSessionController::from_config(config_for(&server, &dir)).unwrap();
    let state = controller
        .sign_in("ada@example.org", "correct-horse")
        .await
        .unwrap();
    assert_eq!(state.status, AuthStatus::Authenticated);
    assert_eq!(state.token.as_ref().unwrap().token, "enhanced-1");
    // Tier falls back to free without a profile row.
    assert_eq!(state.token.as_ref().unwrap().claims["tier"], "free");
    drop(controller);

    let restarted = AuthSessionController::from_config(config_for(&server, &dir)).unwrap();
    assert_eq!(
        restarted.restore_session().await.unwrap(),
        AuthStatus::Authenticated
    );
    assert_eq!(restarted.state().user, state.user);
    assert_eq!(restarted.state().token, state.token);

    restarted.sign_out().await.unwrap();
    let fresh = AuthSessionController::from_config(config_for(&server, &dir)).unwrap();
    assert_eq!(fresh.restore_session().await.unwrap(), AuthStatus::Idle);
}
