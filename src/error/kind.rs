//! Error kind taxonomy for recovery decisions.
//!
//! Every failure the auth core observes is reduced to exactly one
//! [`ErrorKind`]. The kind alone selects the recovery strategy, so the set
//! is closed and small.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed classification of auth-core failures.
///
/// Kinds enable consistent:
/// - Retry policies (infrastructure-shaped vs. identity-shaped errors)
/// - User messaging (short, non-technical text per kind)
/// - Session impact (which kinds force a local reset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connectivity, DNS, timeouts, or a remote service that is unavailable.
    Network,

    /// Credentials rejected or the identity session is missing/expired.
    Authentication,

    /// The provider's refresh token is invalid, revoked, or not found.
    /// Strict subtype of `Authentication` with a harder reset.
    RefreshTokenInvalid,

    /// An access or enhanced token is malformed or expired.
    Token,

    /// Profile store or other data-layer failure.
    Database,

    /// The principal lacks access (tier gate, row-level security, 403).
    Permission,

    /// Caller input was rejected (weak password, duplicate account, ...).
    Validation,

    /// Anything not matched above.
    Unknown,
}

impl ErrorKind {
    /// All kinds, in classifier priority order.
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::RefreshTokenInvalid,
        ErrorKind::Network,
        ErrorKind::Authentication,
        ErrorKind::Token,
        ErrorKind::Permission,
        ErrorKind::Database,
        ErrorKind::Validation,
        ErrorKind::Unknown,
    ];

    /// Returns a short label suitable for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Authentication => "authentication",
            ErrorKind::RefreshTokenInvalid => "refresh_token_invalid",
            ErrorKind::Token => "token",
            ErrorKind::Database => "database",
            ErrorKind::Permission => "permission",
            ErrorKind::Validation => "validation",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Returns true for transient, infrastructure-shaped kinds.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Token | ErrorKind::Database
        )
    }

    /// Returns true for identity-shaped kinds that always reset the session.
    pub fn is_identity(&self) -> bool {
        matches!(
            self,
            ErrorKind::Authentication | ErrorKind::RefreshTokenInvalid
        )
    }

    /// Returns the default user-facing message for this kind.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Network => {
                "We couldn't reach the server. Check your connection and try again."
            }
            ErrorKind::Authentication => "Your session has ended. Please sign in again.",
            ErrorKind::RefreshTokenInvalid => {
                "Your session could not be renewed. Please sign in again."
            }
            ErrorKind::Token => "Your session needs to be renewed. Please sign in again.",
            ErrorKind::Database => {
                "Some of your account data couldn't be loaded. Please try again shortly."
            }
            ErrorKind::Permission => {
                "You don't have access to this. Upgrade your plan or contact support."
            }
            ErrorKind::Validation => "Please check the information you entered.",
            ErrorKind::Unknown => "Something went wrong. Please try again.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
