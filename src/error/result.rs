//! Result type alias for auth-core operations.

use super::auth::AuthError;
use super::context::ErrorContext;

/// Type alias for Results using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;

/// Extension trait for Result types to add context to errors.
///
/// Implemented for any `Result` whose error converts into [`AuthError`], so
/// adapter errors pick up context at the call site in one step.
///
/// # Example
///
/// ```ignore
/// use civic_auth::error::{ErrorContext, ResultExt};
///
/// let stored = store
///     .get(&key)
///     .await
///     .context(ErrorContext::new("restore_session").with_component("session_store"))?;
/// ```
pub trait ResultExt<T> {
    /// Add context to an error if the result is Err.
    fn context(self, ctx: ErrorContext) -> AuthResult<T>;

    /// Add context using a closure (only called on error).
    fn with_context<F>(self, f: F) -> AuthResult<T>
    where
        F: FnOnce() -> ErrorContext;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<AuthError>,
{
    fn context(self, ctx: ErrorContext) -> AuthResult<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F>(self, f: F) -> AuthResult<T>
    where
        F: FnOnce() -> ErrorContext,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
