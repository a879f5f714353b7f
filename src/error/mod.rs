//! Unified error handling for the auth core.
//!
//! - **Error Kinds**: closed taxonomy driving recovery decisions
//! - **Unified Error Type**: [`AuthError`] consolidates adapter and domain errors
//! - **Classifier**: [`classify`] maps any error to exactly one kind
//! - **Error Context**: operation, component and refresh-token involvement
//! - **Result Type Alias**: [`AuthResult<T>`] for consistent return types
//!
//! # Example
//!
//! ```ignore
//! use civic_auth::error::{AuthResult, ErrorContext, ResultExt};
//!
//! async fn restore(store: &dyn KeyValueStore) -> AuthResult<Option<String>> {
//!     store
//!         .get("civic.auth.session")
//!         .await
//!         .context(ErrorContext::new("restore_session"))
//! }
//!
//! match restore(&store).await {
//!     Ok(_) => {}
//!     Err(err) => eprintln!("{} [{}]", err.user_message(), err.kind()),
//! }
//! ```
//!
//! # Error Kinds
//!
//! | Kind | Retried | Session impact |
//! |------|---------|----------------|
//! | network | 3x, exponential | none |
//! | token | 2x | re-auth on exhaustion |
//! | database | 2x | none |
//! | refresh_token_invalid | no | cleared |
//! | authentication | no | cleared |
//! | permission | no | none |
//! | validation | no | none |
//! | unknown | no | none |

mod auth;
mod classify;
mod context;
mod kind;
mod result;

pub use auth::{AuthError, LINK_EXPIRED_MESSAGE};
pub use classify::{classify, classify_message};
pub use context::ErrorContext;
pub use kind::ErrorKind;
pub use result::{AuthResult, ResultExt};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::traits::{HttpError, ProviderError};

    #[test]
    fn test_every_error_has_code_and_message() {
        let errors: Vec<AuthError> = vec![
            HttpError::Timeout("connect".to_string()).into(),
            AuthError::provider("sign_in", ProviderError::new("Invalid login credentials")),
            AuthError::ExchangeUnavailable("refused".to_string()),
            AuthError::OperationInProgress,
            AuthError::NotAuthenticated,
        ];

        for err in errors {
            assert!(err.error_code().starts_with("E_"), "{err:?}");
            assert!(!err.user_message().is_empty(), "{err:?}");
        }
    }

    #[test]
    fn test_context_propagation() {
        let err = AuthError::ExchangeUnavailable("refused".to_string()).with_context(
            ErrorContext::new("exchange")
                .with_component("token_exchange")
                .with_user_id("user-1")
                .with_retry_count(2),
        );

        let ctx = err.context().unwrap();
        assert_eq!(ctx.operation, "exchange");
        assert_eq!(ctx.user_id.as_deref(), Some("user-1"));
        assert_eq!(ctx.retry_count, 2);

        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!err.requires_reauth());
    }
}
