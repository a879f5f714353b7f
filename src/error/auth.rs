//! Unified error type for the auth core.
//!
//! Every fallible operation in the crate returns [`AuthError`]. Adapter-level
//! errors convert into it, and the classifier reduces it to an
//! [`ErrorKind`](super::ErrorKind) for recovery decisions.

use thiserror::Error;

use super::classify::classify;
use super::context::ErrorContext;
use super::kind::ErrorKind;
use crate::recovery::RecoveryOutcome;
use crate::traits::{HttpError, ProfileStoreError, ProviderError, StorageError};

/// User-facing message for rejected or reused sign-in links.
pub const LINK_EXPIRED_MESSAGE: &str =
    "This sign-in link has expired or was already used. Request a new one.";

/// Unified auth-core error.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The identity provider rejected a call.
    #[error("identity provider rejected {operation}: {source}")]
    Provider {
        operation: String,
        #[source]
        source: ProviderError,
        /// The call presented a refresh token.
        refresh_token_involved: bool,
    },

    /// The token-exchange service answered with an error status.
    #[error("token exchange '{action}' failed ({status}): {message}")]
    ExchangeService {
        action: String,
        status: u16,
        message: String,
    },

    /// The token-exchange service could not be reached.
    #[error("token exchange service unavailable: {0}")]
    ExchangeUnavailable(String),

    #[error(transparent)]
    Profile(#[from] ProfileStoreError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A remote answered with a body we could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A token was malformed or expired.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Another sign-in, sign-up or code exchange is still in flight.
    #[error("another sign-in operation is already in progress")]
    OperationInProgress,

    /// Sign-out happened while this operation was pending.
    #[error("operation superseded by sign-out")]
    Superseded,

    /// The view that started a callback flow went away.
    #[error("callback abandoned before completion")]
    Abandoned,

    #[error("not authenticated")]
    NotAuthenticated,

    /// The authorization code was already exchanged by this client.
    #[error("authorization code already used")]
    CodeAlreadyUsed,

    /// No PKCE verifier is stored for the code being exchanged.
    #[error("no code verifier stored for this sign-in link")]
    MissingCodeVerifier,

    /// The redirect callback carried an error instead of a code.
    #[error("sign-in link rejected: {error}")]
    LinkRejected {
        error: String,
        description: Option<String>,
    },

    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Recovery ran and ended in a terminal outcome.
    #[error("{operation} failed after {attempts} attempt(s): {detail}", operation = .0.operation, attempts = .0.attempts, detail = .0.technical_detail)]
    Failed(Box<RecoveryOutcome>),

    /// Error with additional context attached.
    #[error("{error} ({context})")]
    WithContext {
        error: Box<AuthError>,
        context: ErrorContext,
    },
}

impl AuthError {
    /// Provider error for a call that did not involve a refresh token.
    pub fn provider(operation: impl Into<String>, source: ProviderError) -> Self {
        AuthError::Provider {
            operation: operation.into(),
            source,
            refresh_token_involved: false,
        }
    }

    /// Provider error for a refresh-token grant.
    pub fn provider_refresh(operation: impl Into<String>, source: ProviderError) -> Self {
        AuthError::Provider {
            operation: operation.into(),
            source,
            refresh_token_involved: true,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        classify(self)
    }

    /// Short, non-technical message for end users.
    ///
    /// Validation failures reported by the identity provider are passed
    /// through unmodified; everything else uses the per-kind text.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::WithContext { error, .. } => error.user_message(),
            AuthError::Failed(outcome) => outcome.user_message.clone(),
            AuthError::Provider { source, .. } if self.kind() == ErrorKind::Validation => {
                source.message.clone()
            }
            AuthError::LinkRejected { .. } | AuthError::CodeAlreadyUsed => {
                LINK_EXPIRED_MESSAGE.to_string()
            }
            AuthError::MissingCodeVerifier => {
                "Open the sign-in link on the same device you requested it from.".to_string()
            }
            AuthError::OperationInProgress => {
                "A sign-in is already in progress. Please wait.".to_string()
            }
            AuthError::ExchangeUnavailable(_) => {
                "You're signed in, but some features are temporarily unavailable.".to_string()
            }
            _ => self.kind().user_message().to_string(),
        }
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::Provider { .. } => "E_AUTH_PROVIDER",
            AuthError::ExchangeService { .. } => "E_AUTH_EXCHANGE",
            AuthError::ExchangeUnavailable(_) => "E_AUTH_EXCHANGE_DOWN",
            AuthError::Profile(_) => "E_AUTH_PROFILE",
            AuthError::Http(_) => "E_AUTH_HTTP",
            AuthError::Storage(_) => "E_AUTH_STORAGE",
            AuthError::InvalidResponse(_) => "E_AUTH_RESPONSE",
            AuthError::InvalidToken(_) => "E_AUTH_TOKEN",
            AuthError::OperationInProgress => "E_AUTH_BUSY",
            AuthError::Superseded => "E_AUTH_SUPERSEDED",
            AuthError::Abandoned => "E_AUTH_ABANDONED",
            AuthError::NotAuthenticated => "E_AUTH_NOT_AUTH",
            AuthError::CodeAlreadyUsed => "E_AUTH_CODE_USED",
            AuthError::MissingCodeVerifier => "E_AUTH_NO_VERIFIER",
            AuthError::LinkRejected { .. } => "E_AUTH_LINK",
            AuthError::Config(_) => "E_AUTH_CONFIG",
            AuthError::Failed(_) => "E_AUTH_RECOVERY",
            AuthError::WithContext { error, .. } => error.error_code(),
        }
    }

    /// Attach context to this error.
    pub fn with_context(self, ctx: ErrorContext) -> Self {
        AuthError::WithContext {
            error: Box::new(self),
            context: ctx,
        }
    }

    /// Get the outermost context, if any.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            AuthError::WithContext { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Get the inner error without context.
    pub fn inner(&self) -> &AuthError {
        match self {
            AuthError::WithContext { error, .. } => error.inner(),
            _ => self,
        }
    }

    /// Recovery outcome, if this error is the result of a recovery run.
    pub fn outcome(&self) -> Option<&RecoveryOutcome> {
        match self.inner() {
            AuthError::Failed(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Check if this error requires re-authentication.
    pub fn requires_reauth(&self) -> bool {
        match self.inner() {
            AuthError::Failed(outcome) => outcome.requires_reauth(),
            _ => self.kind().is_identity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::Resolution;

    #[test]
    fn test_validation_message_passes_through() {
        let err = AuthError::provider(
            "sign_up",
            ProviderError::new("Password should be at least 6 characters")
                .with_status(422)
                .with_code("weak_password"),
        );
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            err.user_message(),
            "Password should be at least 6 characters"
        );
        assert_eq!(err.error_code(), "E_AUTH_PROVIDER");
    }

    #[test]
    fn test_non_validation_message_is_generic() {
        let err = AuthError::provider(
            "sign_in",
            ProviderError::new("Invalid login credentials").with_status(400),
        );
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(!err.user_message().contains("Invalid login"));
        assert!(err.requires_reauth());
    }

    #[test]
    fn test_link_rejected_message() {
        let err = AuthError::LinkRejected {
            error: "access_denied".to_string(),
            description: Some("Email link is invalid or has expired".to_string()),
        };
        assert_eq!(err.user_message(), LINK_EXPIRED_MESSAGE);
        assert_eq!(err.error_code(), "E_AUTH_LINK");
    }

    #[test]
    fn test_context_wrapping() {
        let err = AuthError::InvalidToken("bad segment".to_string())
            .with_context(ErrorContext::new("validate").with_component("token_exchange"));

        assert_eq!(err.context().map(|c| c.operation.as_str()), Some("validate"));
        assert!(matches!(err.inner(), AuthError::InvalidToken(_)));
        assert_eq!(err.error_code(), "E_AUTH_TOKEN");
        assert_eq!(err.kind(), ErrorKind::Token);
        assert!(err.to_string().contains("validate in token_exchange"));
    }

    #[test]
    fn test_failed_outcome_delegates() {
        let outcome = RecoveryOutcome {
            kind: ErrorKind::RefreshTokenInvalid,
            resolution: Resolution::RequiresReauth,
            user_message: "Your session could not be renewed. Please sign in again.".to_string(),
            technical_detail: "Invalid Refresh Token: Already Used".to_string(),
            attempts: 1,
            operation: "refresh_token".to_string(),
            clear_session: true,
        };
        let err = AuthError::Failed(Box::new(outcome));

        assert_eq!(err.kind(), ErrorKind::RefreshTokenInvalid);
        assert!(err.requires_reauth());
        assert!(err.user_message().contains("could not be renewed"));
        assert!(err.outcome().is_some());
        assert!(err
            .to_string()
            .contains("refresh_token failed after 1 attempt(s)"));
    }

    #[test]
    fn test_from_adapter_errors() {
        let err: AuthError = HttpError::Timeout("30s".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.to_string(), "Request timeout: 30s");

        let err: AuthError = StorageError::WriteFailed("disk full".to_string()).into();
        assert_eq!(err.error_code(), "E_AUTH_STORAGE");
    }
}
