//! Recovery manager.
//!
//! Drives each failure through `detected -> (retry)* -> terminal`:
//! classify, look up the policy, retry with backoff while the policy allows,
//! then run the kind's terminal action and hand back a [`RecoveryOutcome`].

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;

use tracing::{debug, error, info, warn};

use super::outcome::{ErrorRecord, RecoveryOutcome, Resolution};
use super::strategy::{RecoveryStrategy, TerminalAction};
use crate::error::{AuthError, AuthResult, ErrorContext, ErrorKind};
use crate::traits::KeyValueStore;

/// Default size of the rolling error history.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Orchestrates classification, retries and terminal actions.
///
/// The manager never touches auth state or storage. A terminal action that
/// ends the session comes back as [`RecoveryOutcome::clear_session`] and the
/// owner of the state carries it out.
///
/// The history is observational only; it never feeds back into
/// classification or policy.
pub struct RecoveryManager {
    history: Mutex<VecDeque<ErrorRecord>>,
    history_limit: usize,
}

impl RecoveryManager {
    pub fn new(history_limit: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(history_limit.min(256))),
            history_limit: history_limit.max(1),
        }
    }

    /// Run `op`, retrying per policy.
    ///
    /// `op` is re-invoked for each retry. Control errors (`Superseded`,
    /// `Abandoned`, `OperationInProgress`) pass through untouched. Any other
    /// terminal failure comes back as [`AuthError::Failed`].
    pub async fn execute<T, F, Fut>(&self, ctx: ErrorContext, mut op: F) -> AuthResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AuthResult<T>>,
    {
        let mut retries = 0u32;
        let mut last_failure: Option<(ErrorKind, TerminalAction, String)> = None;
        loop {
            match op().await {
                Ok(value) => {
                    if let Some((kind, terminal, message)) = last_failure {
                        info!(
                            operation = %ctx.operation,
                            attempts = retries + 1,
                            "Recovered after retry"
                        );
                        let record = ErrorRecord::new(
                            kind,
                            message,
                            ctx.clone().with_retry_count(retries),
                            terminal,
                            retries + 1,
                        )
                        .with_resolution(Resolution::Recovered);
                        self.push(record);
                    }
                    return Ok(value);
                }
                Err(err) if is_control(&err) => return Err(err),
                Err(err) => {
                    let kind = err.kind();
                    let strategy = RecoveryStrategy::for_kind(kind);
                    let attempt_ctx = ctx.clone().with_retry_count(retries);
                    let exhausted = retries >= strategy.max_retries;
                    let resolution = exhausted.then(|| resolution_for(strategy.terminal));
                    self.record(&err, kind, &attempt_ctx, strategy.terminal, retries + 1, resolution);

                    if !exhausted {
                        last_failure = Some((kind, strategy.terminal, err.to_string()));
                        retries += 1;
                        let delay = strategy.backoff.delay_for_attempt(retries).unwrap_or_default();
                        warn!(
                            operation = %ctx.operation,
                            kind = %kind,
                            attempt = retries,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying after error: {}",
                            err
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let outcome = self.conclude(&err, kind, &attempt_ctx, retries + 1);
                    return Err(AuthError::Failed(Box::new(outcome)));
                }
            }
        }
    }

    /// Run the terminal action for an error without retrying.
    ///
    /// Used where the failing operation must not be re-invoked (for example
    /// a single-use authorization code).
    pub async fn handle(&self, err: &AuthError, ctx: &ErrorContext) -> RecoveryOutcome {
        if let Some(outcome) = err.outcome() {
            return outcome.clone();
        }
        let kind = err.kind();
        let strategy = RecoveryStrategy::for_kind(kind);
        let resolution = resolution_for(strategy.terminal);
        self.record(err, kind, ctx, strategy.terminal, ctx.retry_count + 1, Some(resolution));
        self.conclude(err, kind, ctx, ctx.retry_count + 1)
    }

    fn conclude(
        &self,
        err: &AuthError,
        kind: ErrorKind,
        ctx: &ErrorContext,
        attempts: u32,
    ) -> RecoveryOutcome {
        let terminal = RecoveryStrategy::for_kind(kind).terminal;

        match kind {
            ErrorKind::Unknown => error!(
                kind = %kind,
                code = err.error_code(),
                context = %ctx.to_log_string(),
                "Unclassified failure: {:?}",
                err
            ),
            _ => warn!(
                operation = %ctx.operation,
                kind = %kind,
                attempts,
                action = terminal.as_str(),
                "Recovery exhausted: {}",
                err
            ),
        }

        let resolution = resolution_for(terminal);

        let user_message = match terminal {
            TerminalAction::SurfaceValidation => err.user_message(),
            _ => kind.user_message().to_string(),
        };

        RecoveryOutcome {
            kind,
            resolution,
            user_message,
            technical_detail: err.to_string(),
            attempts,
            operation: ctx.operation.clone(),
            clear_session: terminal.clears_session(),
        }
    }

    fn record(
        &self,
        err: &AuthError,
        kind: ErrorKind,
        ctx: &ErrorContext,
        terminal: TerminalAction,
        attempt: u32,
        resolution: Option<Resolution>,
    ) {
        let mut record = ErrorRecord::new(kind, err.to_string(), ctx.clone(), terminal, attempt);
        record.resolution = resolution;
        debug!(operation = %ctx.operation, kind = %kind, attempt, "Recording error");
        self.push(record);
    }

    fn push(&self, record: ErrorRecord) {
        if let Ok(mut history) = self.history.lock() {
            if history.len() >= self.history_limit {
                history.pop_front();
            }
            history.push_back(record);
        }
    }

    /// Snapshot of recent error records, oldest first.
    pub fn history(&self) -> Vec<ErrorRecord> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_history(&self) {
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

fn resolution_for(terminal: TerminalAction) -> Resolution {
    if terminal.requires_reauth() {
        Resolution::RequiresReauth
    } else {
        Resolution::RequiresManualAction
    }
}

fn is_control(err: &AuthError) -> bool {
    matches!(
        err.inner(),
        AuthError::Superseded | AuthError::Abandoned | AuthError::OperationInProgress
    )
}

/// Remove every key under `namespace`. Returns the number of keys removed.
pub async fn purge_namespace(
    store: &dyn KeyValueStore,
    namespace: &str,
) -> Result<usize, crate::traits::StorageError> {
    let prefix = format!("{}.", namespace);
    let mut removed = 0;
    for key in store.keys().await? {
        if key == namespace || key.starts_with(&prefix) {
            store.remove(&key).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::InMemoryStore;
    use crate::traits::{HttpError, ProviderError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn network_error() -> AuthError {
        AuthError::Http(HttpError::ConnectionFailed("refused".to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_retry_ceiling_and_backoff() {
        let manager = RecoveryManager::default();
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let result: AuthResult<()> = manager
            .execute(ErrorContext::new("exchange"), || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(network_error())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s
        assert_eq!(started.elapsed(), Duration::from_secs(7));

        let err = result.unwrap_err();
        let outcome = err.outcome().unwrap();
        assert_eq!(outcome.kind, ErrorKind::Network);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.resolution, Resolution::RequiresManualAction);
        assert!(!outcome.clear_session);

        let history = manager.history();
        assert_eq!(history.len(), 4);
        assert!(history[..3].iter().all(|r| r.resolution.is_none()));
        assert_eq!(history[3].resolution, Some(Resolution::RequiresManualAction));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_retry() {
        let manager = RecoveryManager::default();
        let calls = Arc::new(AtomicU32::new(0));

        let result = manager
            .execute(ErrorContext::new("refresh"), || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(network_error())
                    } else {
                        Ok("token")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "token");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let history = manager.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].resolution, None);
        let recovered = &history[1];
        assert_eq!(recovered.resolution, Some(Resolution::Recovered));
        assert_eq!(recovered.kind, ErrorKind::Network);
        assert_eq!(recovered.attempt, 2);
        assert_eq!(recovered.context.operation, "refresh");
    }

    #[tokio::test]
    async fn test_first_try_success_records_nothing() {
        let manager = RecoveryManager::default();
        let result = manager
            .execute(ErrorContext::new("validate"), || async { Ok(7) })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert!(manager.history().is_empty());
    }

    #[tokio::test]
    async fn test_validation_is_not_retried() {
        let manager = RecoveryManager::default();
        let calls = Arc::new(AtomicU32::new(0));

        let result: AuthResult<()> = manager
            .execute(ErrorContext::new("sign_up"), || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(AuthError::provider(
                        "sign_up",
                        ProviderError::new("User already registered").with_status(422),
                    ))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.user_message(), "User already registered");
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_exhaustion_requires_reauth() {
        let manager = RecoveryManager::default();
        let calls = Arc::new(AtomicU32::new(0));

        let result: AuthResult<()> = manager
            .execute(ErrorContext::new("refresh_token"), || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(AuthError::InvalidToken("expired".to_string()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.unwrap_err().requires_reauth());
    }

    #[tokio::test]
    async fn test_identity_error_asks_caller_to_clear_session() {
        let manager = RecoveryManager::default();
        let err = AuthError::provider_refresh(
            "refresh_session",
            ProviderError::new("Invalid Refresh Token: Already Used").with_status(400),
        );

        let outcome = manager.handle(&err, &ErrorContext::new("refresh_token")).await;

        assert_eq!(outcome.kind, ErrorKind::RefreshTokenInvalid);
        assert!(outcome.requires_reauth());
        assert!(outcome.clear_session);
        assert_eq!(
            manager.history()[0].resolution,
            Some(Resolution::RequiresReauth)
        );
    }

    #[tokio::test]
    async fn test_purge_namespace_leaves_other_keys() {
        let store = InMemoryStore::new();
        store.insert("civic.auth.session", "{}");
        store.insert("civic.auth.pkce_verifier", "abc");
        store.insert("civic.authority", "keep");
        store.insert("other.app.key", "keep");

        let removed = purge_namespace(&store, "civic.auth").await.unwrap();

        assert_eq!(removed, 2);
        assert_eq!(store.len(), 2);
        assert!(store.contains("civic.authority"));
        assert!(store.contains("other.app.key"));
    }

    #[tokio::test]
    async fn test_control_errors_pass_through() {
        let manager = RecoveryManager::default();
        let result: AuthResult<()> = manager
            .execute(ErrorContext::new("sign_in"), || async {
                Err(AuthError::Superseded)
            })
            .await;
        assert!(matches!(result, Err(AuthError::Superseded)));
        assert!(manager.history().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let manager = RecoveryManager::new(3);
        for i in 0..5 {
            let err = AuthError::InvalidResponse(format!("bad body {i}"));
            manager.handle(&err, &ErrorContext::new("validate")).await;
        }
        let history = manager.history();
        assert_eq!(history.len(), 3);
        assert!(history[0].message.contains("bad body 2"));
        assert!(history[2].message.contains("bad body 4"));

        manager.clear_history();
        assert!(manager.history().is_empty());
    }
}
