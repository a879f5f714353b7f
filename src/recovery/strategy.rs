//! Per-kind recovery policy table.
//!
//! The table is fixed at compile time. Each [`ErrorKind`] maps to exactly
//! one [`RecoveryStrategy`].

use std::time::Duration;

use crate::error::ErrorKind;

/// Upper bound on any single backoff wait.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Delay schedule between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Do not wait (and do not retry).
    None,
    /// Same delay before every retry.
    Fixed { ms: u64 },
    /// `base_ms * 2^(attempt - 1)`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    ///
    /// Never exceeds [`MAX_BACKOFF`]. Returns `None` for [`Backoff::None`].
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        let delay = match *self {
            Backoff::None => return None,
            Backoff::Fixed { ms } => Duration::from_millis(ms),
            Backoff::Exponential { base_ms, max_ms } => {
                let shift = attempt.saturating_sub(1).min(16);
                let ms = base_ms.saturating_mul(1u64 << shift).min(max_ms);
                Duration::from_millis(ms)
            }
        };
        Some(delay.min(MAX_BACKOFF))
    }
}

/// What happens once retries are exhausted (or not allowed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalAction {
    /// Report the connectivity problem to the caller.
    SurfaceNetworkError,
    /// Drop the token and ask the user to sign in again.
    Reauthenticate,
    /// Report that some data could not be loaded.
    SurfaceDegradedData,
    /// Purge persisted session data, force sign-out, back to login.
    PurgeAndSignOut,
    /// Clear the session, back to login.
    ClearSessionAndRedirect,
    /// Report an upgrade/permission message.
    SurfacePermission,
    /// Report a field-level message, no session change.
    SurfaceValidation,
    /// Report a generic message and log everything.
    SurfaceGeneric,
}

impl TerminalAction {
    /// Returns true if the action wipes persisted session data.
    pub fn clears_session(&self) -> bool {
        matches!(
            self,
            TerminalAction::PurgeAndSignOut | TerminalAction::ClearSessionAndRedirect
        )
    }

    /// Returns true if the user has to sign in again afterwards.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            TerminalAction::PurgeAndSignOut
                | TerminalAction::ClearSessionAndRedirect
                | TerminalAction::Reauthenticate
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalAction::SurfaceNetworkError => "surface_network_error",
            TerminalAction::Reauthenticate => "reauthenticate",
            TerminalAction::SurfaceDegradedData => "surface_degraded_data",
            TerminalAction::PurgeAndSignOut => "purge_and_sign_out",
            TerminalAction::ClearSessionAndRedirect => "clear_session_and_redirect",
            TerminalAction::SurfacePermission => "surface_permission",
            TerminalAction::SurfaceValidation => "surface_validation",
            TerminalAction::SurfaceGeneric => "surface_generic",
        }
    }
}

/// Recovery policy for one error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStrategy {
    pub kind: ErrorKind,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub backoff: Backoff,
    pub terminal: TerminalAction,
}

impl RecoveryStrategy {
    /// Look up the policy for a kind.
    pub const fn for_kind(kind: ErrorKind) -> RecoveryStrategy {
        let (max_retries, backoff, terminal) = match kind {
            ErrorKind::Network => (
                3,
                Backoff::Exponential {
                    base_ms: 1_000,
                    max_ms: 10_000,
                },
                TerminalAction::SurfaceNetworkError,
            ),
            ErrorKind::Token => (2, Backoff::Fixed { ms: 500 }, TerminalAction::Reauthenticate),
            ErrorKind::Database => (
                2,
                Backoff::Fixed { ms: 1_000 },
                TerminalAction::SurfaceDegradedData,
            ),
            ErrorKind::RefreshTokenInvalid => (0, Backoff::None, TerminalAction::PurgeAndSignOut),
            ErrorKind::Authentication => {
                (0, Backoff::None, TerminalAction::ClearSessionAndRedirect)
            }
            ErrorKind::Permission => (0, Backoff::None, TerminalAction::SurfacePermission),
            ErrorKind::Validation => (0, Backoff::None, TerminalAction::SurfaceValidation),
            ErrorKind::Unknown => (0, Backoff::None, TerminalAction::SurfaceGeneric),
        };
        RecoveryStrategy {
            kind,
            max_retries,
            backoff,
            terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.max_retries > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table() {
        let network = RecoveryStrategy::for_kind(ErrorKind::Network);
        assert_eq!(network.max_retries, 3);
        assert_eq!(network.terminal, TerminalAction::SurfaceNetworkError);

        assert_eq!(RecoveryStrategy::for_kind(ErrorKind::Token).max_retries, 2);
        assert_eq!(RecoveryStrategy::for_kind(ErrorKind::Database).max_retries, 2);

        for kind in [
            ErrorKind::RefreshTokenInvalid,
            ErrorKind::Authentication,
            ErrorKind::Permission,
            ErrorKind::Validation,
            ErrorKind::Unknown,
        ] {
            let strategy = RecoveryStrategy::for_kind(kind);
            assert!(!strategy.is_retryable(), "{kind}");
            assert_eq!(strategy.backoff, Backoff::None);
        }
    }

    #[test]
    fn test_identity_kinds_clear_session() {
        for kind in ErrorKind::ALL {
            let terminal = RecoveryStrategy::for_kind(kind).terminal;
            assert_eq!(terminal.clears_session(), kind.is_identity(), "{kind}");
        }
        assert!(RecoveryStrategy::for_kind(ErrorKind::Token)
            .terminal
            .requires_reauth());
        assert!(!RecoveryStrategy::for_kind(ErrorKind::Network)
            .terminal
            .requires_reauth());
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = RecoveryStrategy::for_kind(ErrorKind::Network).backoff;
        let delays: Vec<_> = (1..=6)
            .map(|n| backoff.delay_for_attempt(n).unwrap())
            .collect();

        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[2], Duration::from_secs(4));
        assert_eq!(delays[3], Duration::from_secs(8));
        assert_eq!(delays[4], Duration::from_secs(10));
        assert_eq!(delays[5], Duration::from_secs(10));
        assert!(delays.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_backoff_never_exceeds_global_cap() {
        let fixed = Backoff::Fixed { ms: 60_000 };
        assert_eq!(fixed.delay_for_attempt(1), Some(MAX_BACKOFF));

        let huge = Backoff::Exponential {
            base_ms: u64::MAX / 2,
            max_ms: u64::MAX,
        };
        assert_eq!(huge.delay_for_attempt(40), Some(MAX_BACKOFF));
        assert_eq!(Backoff::None.delay_for_attempt(1), None);
    }
}
