//! Common test utilities for integration tests.
//!
//! Builds an [`AuthSessionController`] over the in-memory doubles from
//! `civic_auth::adapters::mock`, with handles kept so tests can inject
//! failures and inspect calls.
//!
//! # Example
//!
//! ```ignore
//! let env = TestEnv::new();
//! env.controller.sign_in(EMAIL, PASSWORD).await?;
//! assert_eq!(env.provider.calls(IdentityOp::SignIn), 1);
//! ```

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use civic_auth::adapters::mock::{
    InMemoryProfileStore, InMemoryStore, MockHttpClient, MockIdentityProvider, MockResponse,
};
use civic_auth::auth::{AuthServices, AuthSessionController, TokenExchangeClient};
use civic_auth::config::AuthConfig;
use civic_auth::traits::{KeyValueStore, Response};
use serde_json::json;

pub const PROVIDER_URL: &str = "https://abc.example.org";
pub const EXCHANGE_URL: &str = "https://abc.example.org/functions/v1/jwt-exchange";
pub const CALLBACK_URL: &str = "https://app.example.org/auth/callback";
pub const EMAIL: &str = "ada@example.org";
pub const PASSWORD: &str = "correct-horse";
pub const SESSION_KEY: &str = "civic.auth.session";

/// Config for tests: no background revalidation, redirect set.
pub fn test_config() -> AuthConfig {
    AuthConfig::new(PROVIDER_URL, "anon-key")
        .with_redirect_url(CALLBACK_URL)
        .with_revalidate_on_restore(false)
}

/// Exchange function double.
///
/// Mints opaque tokens `enhanced-N` that carry back the requested claims and
/// answers `validate` for any token it minted.
pub fn exchange_service() -> MockResponse {
    let counter = Arc::new(AtomicU64::new(0));
    MockResponse::handler(move |request| {
        let body = request.json().unwrap_or_default();
        if body["action"] == "validate" {
            let valid = body["token"]
                .as_str()
                .is_some_and(|t| t.starts_with("enhanced-"));
            return Ok(Response::json_body(200, &json!({ "valid": valid })));
        }
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Response::json_body(
            200,
            &json!({
                "token": format!("enhanced-{}", n),
                "expires_in": 3600,
                "claims": body["custom_claims"].clone(),
            }),
        ))
    })
}

/// A controller plus handles to every double behind it.
pub struct TestEnv {
    pub controller: AuthSessionController,
    pub provider: MockIdentityProvider,
    pub http: MockHttpClient,
    pub profiles: InMemoryProfileStore,
    pub storage: InMemoryStore,
    pub config: AuthConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AuthConfig) -> Self {
        let provider = MockIdentityProvider::new();
        provider.add_user(EMAIL, PASSWORD);
        let http = MockHttpClient::new();
        http.set_response(EXCHANGE_URL, exchange_service());
        let profiles = InMemoryProfileStore::new();
        let storage = InMemoryStore::new();
        let controller = controller_over(
            &config,
            &provider,
            &http,
            &profiles,
            Arc::new(storage.clone()),
        );
        Self {
            controller,
            provider,
            http,
            profiles,
            storage,
            config,
        }
    }

    /// A new controller over the same backends, as after an app restart.
    pub fn restart(&self) -> AuthSessionController {
        controller_over(
            &self.config,
            &self.provider,
            &self.http,
            &self.profiles,
            Arc::new(self.storage.clone()),
        )
    }
}

pub fn controller_over(
    config: &AuthConfig,
    provider: &MockIdentityProvider,
    http: &MockHttpClient,
    profiles: &InMemoryProfileStore,
    storage: Arc<dyn KeyValueStore>,
) -> AuthSessionController {
    let services = AuthServices {
        provider: Arc::new(provider.clone()),
        exchange: TokenExchangeClient::new(
            Arc::new(http.clone()),
            &config.exchange_base_url(),
            &config.exchange_function,
            config.anon_key.clone(),
        ),
        profiles: Arc::new(profiles.clone()),
        storage,
    };
    AuthSessionController::new(services, config.clone())
}
