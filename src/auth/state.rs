//! Controller-owned auth state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::{EnhancedToken, Session, Tier, User, UserProfile};
use crate::error::{AuthError, ErrorKind};
use crate::recovery::RecoveryOutcome;

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    #[default]
    Idle,
    Authenticating,
    Authenticated,
    Error,
}

impl AuthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStatus::Idle => "idle",
            AuthStatus::Authenticating => "authenticating",
            AuthStatus::Authenticated => "authenticated",
            AuthStatus::Error => "error",
        }
    }
}

/// An error as shown to the user: short message, no technical detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurfacedError {
    pub kind: ErrorKind,
    pub message: String,
    pub code: String,
    pub operation: String,
    pub requires_reauth: bool,
}

impl SurfacedError {
    pub fn from_outcome(outcome: &RecoveryOutcome, code: &str) -> Self {
        Self {
            kind: outcome.kind,
            message: outcome.user_message.clone(),
            code: code.to_string(),
            operation: outcome.operation.clone(),
            requires_reauth: outcome.requires_reauth(),
        }
    }

    pub fn from_error(err: &AuthError, operation: &str) -> Self {
        if let Some(outcome) = err.outcome() {
            return Self::from_outcome(outcome, err.error_code());
        }
        Self {
            kind: err.kind(),
            message: err.user_message(),
            code: err.error_code().to_string(),
            operation: operation.to_string(),
            requires_reauth: err.requires_reauth(),
        }
    }
}

/// Snapshot of the controller's state.
///
/// `status == Authenticated` iff `user` and `session` are present. The
/// enhanced token may be missing while authenticated only when
/// `token_error` says why.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AuthState {
    pub user: Option<User>,
    pub profile: Option<UserProfile>,
    pub token: Option<EnhancedToken>,
    #[serde(skip)]
    pub session: Option<Session>,
    pub status: AuthStatus,
    pub error: Option<SurfacedError>,
    /// Non-fatal: signed in at the provider, but no enhanced token.
    pub token_error: Option<SurfacedError>,
    pub login_attempt_count: u32,
    pub last_login_timestamp: Option<DateTime<Utc>>,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        self.status == AuthStatus::Authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.status == AuthStatus::Authenticating
    }

    /// Authenticated but without an enhanced token.
    pub fn is_degraded(&self) -> bool {
        self.is_authenticated() && self.token.is_none()
    }

    /// Tier from the token, falling back to the cached profile.
    pub fn tier(&self) -> Tier {
        self.token
            .as_ref()
            .and_then(|t| t.tier())
            .or_else(|| self.profile.as_ref().map(|p| p.tier))
            .unwrap_or_default()
    }

    /// Drop identity data, keeping only login bookkeeping.
    pub(crate) fn reset(&mut self) {
        self.user = None;
        self.profile = None;
        self.token = None;
        self.session = None;
        self.token_error = None;
        self.status = AuthStatus::Idle;
    }

    /// While authenticating, the previous identity (if any) stays visible.
    pub fn is_consistent(&self) -> bool {
        let identity = self.user.is_some() && self.session.is_some();
        match self.status {
            AuthStatus::Authenticating => true,
            AuthStatus::Authenticated => {
                identity && (self.token.is_some() || self.token_error.is_some())
            }
            AuthStatus::Idle | AuthStatus::Error => {
                self.user.is_none() && self.session.is_none() && self.token.is_none()
            }
        }
    }
}
