//! Domain types shared across the auth core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Claims carried by an enhanced token, keyed by claim name.
pub type ClaimSet = serde_json::Map<String, serde_json::Value>;

/// Upper bound on an enhanced token's lifetime, in seconds.
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 3600;

/// How the identity session was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignInMethod {
    #[default]
    Password,
    PasswordlessLink,
    Social,
}

/// Identity-provider session.
///
/// Owned by the provider; the core only caches the latest copy.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as Unix timestamp (seconds).
    pub expires_at: i64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub method: SignInMethod,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Returns true if the session has expired.
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.expires_at
    }

    /// Returns true if the session expires within `secs` seconds.
    pub fn expires_within(&self, secs: i64) -> bool {
        Utc::now().timestamp() + secs >= self.expires_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("method", &self.method)
            .finish()
    }
}

/// The authenticated principal as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default = "default_role")]
    pub role: String,
    /// Free-form metadata supplied at sign-up.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_role() -> String {
    "authenticated".to_string()
}

/// Subscription/access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    #[serde(alias = "premium")]
    Elevated,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Elevated => "elevated",
        }
    }
}

/// Application-level profile extending the identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub notify_email: bool,
    #[serde(default)]
    pub notify_sms: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// A profile is complete once name, phone and postal code are filled in.
    pub fn is_complete(&self) -> bool {
        [&self.display_name, &self.phone, &self.postal_code]
            .iter()
            .all(|field| field.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }

    /// Build an initial profile from a sign-up seed.
    pub fn from_seed(user_id: &str, seed: &ProfileSeed) -> Self {
        Self {
            id: user_id.to_string(),
            display_name: seed.display_name.clone(),
            tier: Tier::Free,
            phone: seed.phone.clone(),
            postal_code: seed.postal_code.clone(),
            notify_email: seed.notify_email,
            notify_sms: seed.notify_sms,
            updated_at: None,
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, changes: &ProfileUpdate) {
        if let Some(ref name) = changes.display_name {
            self.display_name = Some(name.clone());
        }
        if let Some(ref phone) = changes.phone {
            self.phone = Some(phone.clone());
        }
        if let Some(ref postal_code) = changes.postal_code {
            self.postal_code = Some(postal_code.clone());
        }
        if let Some(notify_email) = changes.notify_email {
            self.notify_email = notify_email;
        }
        if let Some(notify_sms) = changes.notify_sms {
            self.notify_sms = notify_sms;
        }
        self.updated_at = Some(Utc::now());
    }
}

/// Profile fields supplied at sign-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProfileSeed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub notify_email: bool,
    #[serde(default)]
    pub notify_sms: bool,
}

/// Partial profile update. Tier is server-managed and not updatable here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_email: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_sms: Option<bool>,
}

/// What produced an enhanced token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenType {
    SessionExchange,
    Refresh,
    AuthorizationCodeExchange,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::SessionExchange => "session-exchange",
            TokenType::Refresh => "refresh",
            TokenType::AuthorizationCodeExchange => "authorization-code-exchange",
        }
    }
}

/// Application-minted token carrying custom claims.
///
/// Replaced wholesale on refresh, never mutated in place.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedToken {
    pub token: String,
    pub claims: ClaimSet,
    pub issued_at: i64,
    pub expires_at: i64,
    pub token_type: TokenType,
}

impl EnhancedToken {
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.expires_at
    }

    pub fn expires_within(&self, secs: i64) -> bool {
        Utc::now().timestamp() + secs >= self.expires_at
    }

    /// Tier claim, if present and recognised.
    pub fn tier(&self) -> Option<Tier> {
        self.claims
            .get("tier")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.claims.get(name)
    }
}

impl fmt::Debug for EnhancedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnhancedToken")
            .field("token", &"<redacted>")
            .field("claims", &self.claims)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Result of a provider call that may establish a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAuthResponse {
    pub user: User,
    /// `None` when the provider requires e-mail confirmation first.
    pub session: Option<Session>,
}

/// Result of a token validation round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenValidation {
    pub valid: bool,
    #[serde(default)]
    pub claims: Option<ClaimSet>,
}
