//! Token exchange client.
//!
//! Converts a provider session into an enhanced token by calling a remote
//! exchange function with `{ "action": "exchange" | "refresh" | "validate" }`.
//! The service signs the token; this client only decodes the payload to learn
//! issue and expiry times.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::claims::fill_required;
use super::types::{ClaimSet, EnhancedToken, TokenType, TokenValidation, MAX_TOKEN_LIFETIME_SECS};
use crate::error::{AuthError, AuthResult};
use crate::traits::{Headers, HttpClient, Response};

/// Exchange response body.
#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    #[serde(alias = "access_token", alias = "jwt")]
    token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    claims: Option<ClaimSet>,
}

/// Client for the remote token-exchange function.
pub struct TokenExchangeClient {
    http: Arc<dyn HttpClient>,
    endpoint: String,
    anon_key: String,
}

impl TokenExchangeClient {
    /// `base_url` is the functions root, `function` the exchange function name.
    pub fn new(
        http: Arc<dyn HttpClient>,
        base_url: &str,
        function: &str,
        anon_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint: format!("{}/{}", base_url.trim_end_matches('/'), function),
            anon_key: anon_key.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// First-time exchange after sign-in, sign-up or code exchange.
    pub async fn exchange(
        &self,
        access_token: &str,
        claims: &ClaimSet,
        token_type: TokenType,
    ) -> AuthResult<EnhancedToken> {
        let body = serde_json::json!({ "action": "exchange", "custom_claims": claims });
        let response = self.call("exchange", access_token, body).await?;
        let token = parse_token(&response, claims, token_type)?;
        info!(
            token_type = token_type.as_str(),
            expires_at = token.expires_at,
            "Enhanced token issued"
        );
        Ok(token)
    }

    /// Re-issue with updated claims. Needs only the current provider session.
    pub async fn refresh(&self, access_token: &str, claims: &ClaimSet) -> AuthResult<EnhancedToken> {
        let body = serde_json::json!({ "action": "refresh", "custom_claims": claims });
        let response = self.call("refresh", access_token, body).await?;
        let token = parse_token(&response, claims, TokenType::Refresh)?;
        debug!(expires_at = token.expires_at, "Enhanced token refreshed");
        Ok(token)
    }

    /// Stateless validity check.
    pub async fn validate(&self, access_token: &str, token: &str) -> AuthResult<TokenValidation> {
        let body = serde_json::json!({ "action": "validate", "token": token });
        let response = self.call("validate", access_token, body).await?;
        response.json().map_err(|e| {
            AuthError::InvalidResponse(format!(
                "Invalid validation response: {}. Response: {}",
                e,
                response.snippet(200)
            ))
        })
    }

    /// Reachability probe. Any HTTP answer counts as reachable.
    pub async fn ping(&self) -> AuthResult<u16> {
        let response = self
            .http
            .get(&self.endpoint, &self.headers(&self.anon_key))
            .await
            .map_err(|e| {
                if e.is_unreachable() {
                    AuthError::ExchangeUnavailable(e.to_string())
                } else {
                    AuthError::Http(e)
                }
            })?;
        Ok(response.status)
    }

    fn headers(&self, bearer: &str) -> Headers {
        let mut headers = Headers::new();
        headers.insert("apikey".to_string(), self.anon_key.clone());
        headers.insert("Authorization".to_string(), format!("Bearer {}", bearer));
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers
    }

    async fn call(
        &self,
        action: &str,
        access_token: &str,
        body: serde_json::Value,
    ) -> AuthResult<Response> {
        debug!(action, endpoint = %self.endpoint, "Calling token exchange");
        let response = self
            .http
            .post(&self.endpoint, &body.to_string(), &self.headers(access_token))
            .await
            .map_err(|e| {
                if e.is_unreachable() {
                    AuthError::ExchangeUnavailable(e.to_string())
                } else {
                    AuthError::Http(e)
                }
            })?;

        if !response.is_success() {
            return Err(AuthError::ExchangeService {
                action: action.to_string(),
                status: response.status,
                message: error_message(&response),
            });
        }
        Ok(response)
    }
}

fn error_message(response: &Response) -> String {
    let body: serde_json::Value = response.json().unwrap_or(serde_json::Value::Null);
    ["error", "message", "msg"]
        .iter()
        .find_map(|key| body.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        .unwrap_or_else(|| response.snippet(200))
}

/// Decode the payload segment of a JWT without verifying it.
pub fn decode_payload(token: &str) -> Option<ClaimSet> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn parse_token(
    response: &Response,
    requested: &ClaimSet,
    token_type: TokenType,
) -> AuthResult<EnhancedToken> {
    let body: ExchangeResponse = response.json().map_err(|e| {
        AuthError::InvalidResponse(format!(
            "Invalid exchange response: {}. Response: {}",
            e,
            response.snippet(200)
        ))
    })?;
    if body.token.is_empty() {
        return Err(AuthError::InvalidToken("exchange returned an empty token".to_string()));
    }

    let payload = decode_payload(&body.token);
    let now = Utc::now().timestamp();
    let issued_at = payload
        .as_ref()
        .and_then(|p| p.get("iat"))
        .and_then(|v| v.as_i64())
        .unwrap_or(now);
    let stated_expiry = payload
        .as_ref()
        .and_then(|p| p.get("exp"))
        .and_then(|v| v.as_i64())
        .or(body.expires_at)
        .or(body.expires_in.map(|secs| issued_at + secs));
    let ceiling = issued_at + MAX_TOKEN_LIFETIME_SECS;
    let expires_at = stated_expiry.map_or(ceiling, |exp| exp.min(ceiling));

    let mut claims = payload
        .or(body.claims)
        .unwrap_or_else(|| requested.clone());
    fill_required(&mut claims, requested);

    Ok(EnhancedToken {
        token: body.token,
        claims,
        issued_at,
        expires_at,
        token_type,
    })
}
