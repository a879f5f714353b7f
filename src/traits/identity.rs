//! Identity provider trait abstraction.
//!
//! The identity provider is the external service of record for credentials
//! and sessions. The gateway in [`crate::auth::gateway`] is the only caller;
//! it layers session caching, error tagging and change notification on top.

use async_trait::async_trait;

use crate::auth::types::{ProviderAuthResponse, User};

/// Error reported by the identity provider.
///
/// Carries the provider's own message verbatim so that validation failures
/// (weak password, duplicate account) can be surfaced unmodified.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderError {
    /// Provider message, unmodified.
    pub message: String,
    /// HTTP status, or `None` when the request never got a response.
    pub status: Option<u16>,
    /// Machine-readable provider code (`weak_password`, `user_already_exists`, ...).
    pub code: Option<String>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            code: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.status, &self.code) {
            (Some(status), Some(code)) => {
                write!(f, "Provider error ({} {}): {}", status, code, self.message)
            }
            (Some(status), None) => write!(f, "Provider error ({}): {}", status, self.message),
            (None, Some(code)) => write!(f, "Provider error ({}): {}", code, self.message),
            (None, None) => write!(f, "Provider error: {}", self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Trait for identity provider primitives.
///
/// Implementations include the GoTrue-style REST adapter and the scripted
/// mock in [`crate::adapters::mock`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account. `session` is `None` when e-mail confirmation is pending.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &serde_json::Value,
    ) -> Result<ProviderAuthResponse, ProviderError>;

    /// Password grant.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderAuthResponse, ProviderError>;

    /// Send a one-time sign-in link bound to a PKCE code challenge.
    async fn send_magic_link(
        &self,
        email: &str,
        code_challenge: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), ProviderError>;

    /// Exchange an authorization code (plus its PKCE verifier) for a session.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<ProviderAuthResponse, ProviderError>;

    /// Refresh-token grant.
    async fn refresh_session(&self, refresh_token: &str)
        -> Result<ProviderAuthResponse, ProviderError>;

    /// Fetch the user behind an access token.
    async fn get_user(&self, access_token: &str) -> Result<User, ProviderError>;

    /// Revoke the session remotely.
    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError>;

    /// Send a password-reset e-mail.
    async fn reset_password(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), ProviderError>;

    /// Lightweight reachability probe.
    async fn health(&self) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        assert_eq!(
            ProviderError::new("Invalid login credentials")
                .with_status(400)
                .to_string(),
            "Provider error (400): Invalid login credentials"
        );
        assert_eq!(
            ProviderError::new("Password should be at least 6 characters")
                .with_status(422)
                .with_code("weak_password")
                .to_string(),
            "Provider error (422 weak_password): Password should be at least 6 characters"
        );
        assert_eq!(
            ProviderError::new("offline").to_string(),
            "Provider error: offline"
        );
    }

    #[test]
    fn test_provider_error_builder() {
        let err = ProviderError::new("x").with_code("user_already_exists");
        assert_eq!(err.code.as_deref(), Some("user_already_exists"));
        assert!(err.status.is_none());
    }
}
