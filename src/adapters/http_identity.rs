//! GoTrue-style REST identity provider adapter.
//!
//! Speaks the `/auth/v1/*` API: password and refresh-token grants, PKCE
//! code exchange, one-time links, logout, user fetch and password recovery.
//! Provider error bodies may take several shapes; whatever message the
//! provider sent is kept verbatim.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::auth::pkce::CHALLENGE_METHOD;
use crate::auth::types::{ProviderAuthResponse, Session, SignInMethod, User};
use crate::traits::{Headers, HttpClient, HttpError, IdentityProvider, ProviderError, Response};

/// Identity provider over HTTP.
pub struct HttpIdentityProvider {
    http: Arc<dyn HttpClient>,
    base_url: String,
    anon_key: String,
}

/// User object as returned by `/auth/v1/user` and embedded in token responses.
#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    user_metadata: serde_json::Value,
}

impl From<WireUser> for User {
    fn from(w: WireUser) -> Self {
        User {
            id: w.id,
            email: w.email,
            email_verified: w.email_confirmed_at.is_some() || w.confirmed_at.is_some(),
            role: w
                .role
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "authenticated".to_string()),
            metadata: w.user_metadata,
        }
    }
}

/// Token grant response.
#[derive(Debug, Deserialize)]
struct WireSession {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    user: WireUser,
}

impl WireSession {
    fn into_response(self, method: SignInMethod) -> ProviderAuthResponse {
        let expires_at = self
            .expires_at
            .unwrap_or_else(|| Utc::now().timestamp() + self.expires_in.unwrap_or(3600));
        ProviderAuthResponse {
            user: self.user.into(),
            session: Some(Session {
                access_token: self.access_token,
                refresh_token: self.refresh_token,
                expires_at,
                token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
                method,
            }),
        }
    }
}

impl HttpIdentityProvider {
    pub fn new(
        http: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn with_redirect(url: String, redirect_to: Option<&str>) -> String {
        match redirect_to {
            Some(redirect) => format!("{}?redirect_to={}", url, urlencoding::encode(redirect)),
            None => url,
        }
    }

    fn headers(&self, bearer: Option<&str>) -> Headers {
        let mut headers = Headers::new();
        headers.insert("apikey".to_string(), self.anon_key.clone());
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", bearer.unwrap_or(&self.anon_key)),
        );
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers
    }

    async fn post(
        &self,
        url: &str,
        body: serde_json::Value,
        bearer: Option<&str>,
    ) -> Result<Response, ProviderError> {
        let response = self
            .http
            .post(url, &body.to_string(), &self.headers(bearer))
            .await
            .map_err(transport_error)?;
        if !response.is_success() {
            return Err(parse_error(&response));
        }
        Ok(response)
    }

    async fn grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
        method: SignInMethod,
    ) -> Result<ProviderAuthResponse, ProviderError> {
        let url = format!("{}?grant_type={}", self.url("token"), grant_type);
        debug!(grant_type, "Requesting provider token");
        let response = self.post(&url, body, None).await?;
        let session: WireSession = response.json().map_err(|e| {
            invalid_body(&response, &format!("Invalid token response: {}", e))
        })?;
        Ok(session.into_response(method))
    }
}

fn transport_error(err: HttpError) -> ProviderError {
    if err.is_unreachable() {
        ProviderError::new(format!("network error: {}", err))
    } else {
        ProviderError::new(err.to_string())
    }
}

fn invalid_body(response: &Response, message: &str) -> ProviderError {
    ProviderError::new(format!("{}. Response: {}", message, response.snippet(200)))
        .with_status(response.status)
}

/// Parse a provider error body.
///
/// Accepts `{error_description|msg|message|error, error_code|code}` in any
/// combination, falling back to the raw body.
fn parse_error(response: &Response) -> ProviderError {
    let body: serde_json::Value = response.json().unwrap_or(serde_json::Value::Null);
    let text = |key: &str| {
        body.get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let message = text("error_description")
        .or_else(|| text("msg"))
        .or_else(|| text("message"))
        .or_else(|| text("error"))
        .unwrap_or_else(|| {
            let raw = response.snippet(200);
            if raw.trim().is_empty() {
                format!("HTTP {}", response.status)
            } else {
                raw
            }
        });

    let code = text("error_code").or_else(|| text("code")).or_else(|| {
        // OAuth-style bodies put the code in `error` next to a description.
        text("error_description").and_then(|_| text("error"))
    });

    let mut err = ProviderError::new(message).with_status(response.status);
    if let Some(code) = code {
        err = err.with_code(code);
    }
    err
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &serde_json::Value,
    ) -> Result<ProviderAuthResponse, ProviderError> {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "data": metadata,
        });
        let response = self.post(&self.url("signup"), body, None).await?;

        // With autoconfirm the provider returns a session, otherwise the bare user.
        if let Ok(session) = response.json::<WireSession>() {
            return Ok(session.into_response(SignInMethod::Password));
        }
        let user: WireUser = response
            .json()
            .map_err(|e| invalid_body(&response, &format!("Invalid sign-up response: {}", e)))?;
        Ok(ProviderAuthResponse {
            user: user.into(),
            session: None,
        })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderAuthResponse, ProviderError> {
        self.grant(
            "password",
            serde_json::json!({ "email": email, "password": password }),
            SignInMethod::Password,
        )
        .await
    }

    async fn send_magic_link(
        &self,
        email: &str,
        code_challenge: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), ProviderError> {
        let url = Self::with_redirect(self.url("otp"), redirect_to);
        let body = serde_json::json!({
            "email": email,
            "create_user": true,
            "code_challenge": code_challenge,
            "code_challenge_method": CHALLENGE_METHOD,
        });
        self.post(&url, body, None).await.map(|_| ())
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<ProviderAuthResponse, ProviderError> {
        self.grant(
            "pkce",
            serde_json::json!({ "auth_code": code, "code_verifier": code_verifier }),
            SignInMethod::PasswordlessLink,
        )
        .await
    }

    async fn refresh_session(
        &self,
        refresh_token: &str,
    ) -> Result<ProviderAuthResponse, ProviderError> {
        self.grant(
            "refresh_token",
            serde_json::json!({ "refresh_token": refresh_token }),
            SignInMethod::Password,
        )
        .await
    }

    async fn get_user(&self, access_token: &str) -> Result<User, ProviderError> {
        let response = self
            .http
            .get(&self.url("user"), &self.headers(Some(access_token)))
            .await
            .map_err(transport_error)?;
        if !response.is_success() {
            return Err(parse_error(&response));
        }
        let user: WireUser = response
            .json()
            .map_err(|e| invalid_body(&response, &format!("Invalid user response: {}", e)))?;
        Ok(user.into())
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        self.post(
            &self.url("logout"),
            serde_json::json!({}),
            Some(access_token),
        )
        .await
        .map(|_| ())
    }

    async fn reset_password(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), ProviderError> {
        let url = Self::with_redirect(self.url("recover"), redirect_to);
        self.post(&url, serde_json::json!({ "email": email }), None)
            .await
            .map(|_| ())
    }

    async fn health(&self) -> Result<(), ProviderError> {
        let response = self
            .http
            .get(&self.url("health"), &self.headers(None))
            .await
            .map_err(transport_error)?;
        if response.is_success() {
            Ok(())
        } else {
            Err(parse_error(&response))
        }
    }
}
