//! Identity gateway.
//!
//! Wraps the identity provider: caches the current session, tags provider
//! errors with the operation and refresh-token involvement, and publishes
//! session changes on a broadcast channel.
//!
//! A refresh-token failure signs the gateway out locally the moment it is
//! detected, so a dead refresh token cannot fail silently on every call.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::types::{ProfileSeed, Session, User};
use crate::error::{AuthError, AuthResult, ErrorKind};
use crate::traits::IdentityProvider;

const EVENT_CAPACITY: usize = 64;

/// A change to the provider session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn { user: User, session: Session },
    SignedOut { reason: SignOutReason },
    TokenRefreshed { session: Session },
    UserUpdated { user: User },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// The application asked for it.
    Requested,
    /// The refresh token was rejected.
    RefreshTokenInvalid,
}

/// Receiving end of the session-change stream.
///
/// Dropping it or calling [`unsubscribe`](Self::unsubscribe) detaches the
/// listener.
pub struct SessionSubscription {
    rx: broadcast::Receiver<SessionEvent>,
}

impl SessionSubscription {
    /// Next event, or `None` once the gateway is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Session listener lagged, missed {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

/// Result of a sign-up.
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpResult {
    Authenticated { user: User, session: Session },
    /// The provider wants the e-mail address confirmed first.
    PendingConfirmation { user: User },
}

/// Session-caching wrapper around an [`IdentityProvider`].
pub struct IdentityGateway {
    provider: Arc<dyn IdentityProvider>,
    current: Mutex<Option<(User, Session)>>,
    events: broadcast::Sender<SessionEvent>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl IdentityGateway {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            provider,
            current: Mutex::new(None),
            events,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription {
            rx: self.events.subscribe(),
        }
    }

    pub fn current_session(&self) -> Option<Session> {
        self.lock_current().as_ref().map(|(_, s)| s.clone())
    }

    pub fn current_user(&self) -> Option<User> {
        self.lock_current().as_ref().map(|(u, _)| u.clone())
    }

    /// Seed the cache from persisted data without calling the provider.
    pub fn restore(&self, user: User, session: Session) {
        *self.lock_current() = Some((user, session));
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        seed: &ProfileSeed,
    ) -> AuthResult<SignUpResult> {
        let metadata = serde_json::to_value(seed).unwrap_or(serde_json::Value::Null);
        let response = self
            .provider
            .sign_up(email, password, &metadata)
            .await
            .map_err(|e| self.provider_failure(AuthError::provider("sign_up", e)))?;

        match response.session {
            Some(session) => {
                self.set_signed_in(response.user.clone(), session.clone());
                Ok(SignUpResult::Authenticated {
                    user: response.user,
                    session,
                })
            }
            None => {
                info!(user_id = %response.user.id, "Sign-up pending e-mail confirmation");
                Ok(SignUpResult::PendingConfirmation {
                    user: response.user,
                })
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<(User, Session)> {
        let response = self
            .provider
            .sign_in_with_password(email, password)
            .await
            .map_err(|e| self.provider_failure(AuthError::provider("sign_in", e)))?;
        let session = response.session.ok_or_else(|| {
            AuthError::InvalidResponse("provider returned no session for sign-in".to_string())
        })?;
        self.set_signed_in(response.user.clone(), session.clone());
        Ok((response.user, session))
    }

    pub async fn send_magic_link(
        &self,
        email: &str,
        code_challenge: &str,
        redirect_to: Option<&str>,
    ) -> AuthResult<()> {
        self.provider
            .send_magic_link(email, code_challenge, redirect_to)
            .await
            .map_err(|e| self.provider_failure(AuthError::provider("send_magic_link", e)))
    }

    /// Exchange a single-use authorization code. Callers must not invoke this
    /// twice for the same code.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> AuthResult<(User, Session)> {
        let response = self
            .provider
            .exchange_code(code, code_verifier)
            .await
            .map_err(|e| self.provider_failure(AuthError::provider("exchange_code", e)))?;
        let session = response.session.ok_or_else(|| {
            AuthError::InvalidResponse("provider returned no session for code".to_string())
        })?;
        self.set_signed_in(response.user.clone(), session.clone());
        Ok((response.user, session))
    }

    /// Clear the local session, then tell the provider. Local sign-out
    /// always succeeds; a failed remote call is only logged.
    pub async fn sign_out(&self) {
        let previous = self.clear_local(SignOutReason::Requested);
        if let Some((_, session)) = previous {
            if let Err(e) = self.provider.sign_out(&session.access_token).await {
                warn!("Remote sign-out failed, local session already cleared: {}", e);
            }
        }
    }

    /// Cached session, refreshed first if it has expired.
    pub async fn get_session(&self) -> AuthResult<Option<Session>> {
        match self.current_session() {
            None => Ok(None),
            Some(session) if !session.is_expired() => Ok(Some(session)),
            Some(_) => self.refresh_if_expiring(0).await.map(Some),
        }
    }

    /// Refresh unconditionally.
    pub async fn refresh_session(&self) -> AuthResult<Session> {
        self.refresh_if_expiring(i64::MAX / 2).await
    }

    /// Refresh if the session expires within `threshold_secs`.
    ///
    /// Refreshes are serialized; a caller that waited on another refresh
    /// sees its result instead of rotating the token again.
    pub async fn refresh_if_expiring(&self, threshold_secs: i64) -> AuthResult<Session> {
        let before = self.current_session().ok_or(AuthError::NotAuthenticated)?;
        let _guard = self.refresh_lock.lock().await;

        let session = self.current_session().ok_or(AuthError::NotAuthenticated)?;
        if session.access_token != before.access_token {
            return Ok(session);
        }
        if !session.expires_within(threshold_secs) {
            return Ok(session);
        }

        debug!("Refreshing provider session");
        let response = match self.provider.refresh_session(&session.refresh_token).await {
            Ok(response) => response,
            Err(e) => {
                return Err(self.provider_failure(AuthError::provider_refresh("refresh_session", e)));
            }
        };

        let mut refreshed = response.session.ok_or_else(|| {
            AuthError::InvalidResponse("provider returned no session for refresh".to_string())
        })?;
        refreshed.method = session.method;

        {
            let mut current = self.lock_current();
            // A sign-out while the refresh was in flight wins.
            if current.is_none() {
                return Err(AuthError::Superseded);
            }
            *current = Some((response.user, refreshed.clone()));
        }
        let _ = self.events.send(SessionEvent::TokenRefreshed {
            session: refreshed.clone(),
        });
        Ok(refreshed)
    }

    /// Re-fetch the user for the current session.
    pub async fn fetch_user(&self) -> AuthResult<User> {
        let session = self.get_session().await?.ok_or(AuthError::NotAuthenticated)?;
        let user = self
            .provider
            .get_user(&session.access_token)
            .await
            .map_err(|e| self.provider_failure(AuthError::provider("get_user", e)))?;

        let changed = {
            let mut current = self.lock_current();
            match current.as_mut() {
                Some((cached, _)) if *cached != user => {
                    *cached = user.clone();
                    true
                }
                _ => false,
            }
        };
        if changed {
            let _ = self.events.send(SessionEvent::UserUpdated { user: user.clone() });
        }
        Ok(user)
    }

    pub async fn reset_password(&self, email: &str, redirect_to: Option<&str>) -> AuthResult<()> {
        self.provider
            .reset_password(email, redirect_to)
            .await
            .map_err(|e| self.provider_failure(AuthError::provider("reset_password", e)))
    }

    pub async fn health(&self) -> AuthResult<()> {
        self.provider
            .health()
            .await
            .map_err(|e| AuthError::provider("health", e))
    }

    /// Keep the provider session fresh in the background.
    ///
    /// Checks every `interval` and refreshes when the session expires within
    /// `threshold`. Stops once the session is gone.
    pub fn start_auto_refresh(
        self: &Arc<Self>,
        interval: Duration,
        threshold: Duration,
    ) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if gateway.current_session().is_none() {
                    debug!("No provider session, stopping auto refresh");
                    break;
                }
                let threshold_secs = i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX / 2);
                match gateway.refresh_if_expiring(threshold_secs).await {
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::RefreshTokenInvalid => break,
                    Err(e) => warn!("Background session refresh failed: {}", e),
                }
            }
        })
    }

    fn set_signed_in(&self, user: User, session: Session) {
        *self.lock_current() = Some((user.clone(), session.clone()));
        info!(user_id = %user.id, "Provider session established");
        let _ = self.events.send(SessionEvent::SignedIn { user, session });
    }

    /// Sign out locally if `err` says the refresh token is dead.
    fn provider_failure(&self, err: AuthError) -> AuthError {
        if err.kind() == ErrorKind::RefreshTokenInvalid {
            warn!("Refresh token rejected, signing out locally: {}", err);
            self.clear_local(SignOutReason::RefreshTokenInvalid);
        }
        err
    }

    fn clear_local(&self, reason: SignOutReason) -> Option<(User, Session)> {
        let previous = self.lock_current().take();
        if previous.is_some() {
            let _ = self.events.send(SessionEvent::SignedOut { reason });
        }
        previous
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<(User, Session)>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{IdentityOp, MockIdentityProvider};
    use crate::traits::ProviderError;

    fn setup() -> (MockIdentityProvider, Arc<IdentityGateway>) {
        let provider = MockIdentityProvider::new();
        provider.add_user("ada@example.org", "correct-horse");
        let gateway = Arc::new(IdentityGateway::new(Arc::new(provider.clone())));
        (provider, gateway)
    }

    #[tokio::test]
    async fn test_sign_in_caches_session_and_emits_event() {
        let (_provider, gateway) = setup();
        let mut events = gateway.subscribe();

        let (user, session) = gateway.sign_in("ada@example.org", "correct-horse").await.unwrap();
        assert_eq!(gateway.current_user(), Some(user.clone()));
        assert_eq!(gateway.current_session(), Some(session.clone()));
        assert_eq!(
            events.try_recv(),
            Some(SessionEvent::SignedIn { user, session })
        );
    }

    #[tokio::test]
    async fn test_sign_up_duplicate_keeps_provider_message() {
        let (_provider, gateway) = setup();
        let err = gateway
            .sign_up("ada@example.org", "another-pass", &ProfileSeed::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.user_message(), "User already registered");
    }

    #[tokio::test]
    async fn test_sign_up_pending_confirmation() {
        let (provider, gateway) = setup();
        provider.set_require_confirmation(true);
        let result = gateway
            .sign_up("new@example.org", "long-enough", &ProfileSeed::default())
            .await
            .unwrap();
        assert!(matches!(result, SignUpResult::PendingConfirmation { .. }));
        assert!(gateway.current_session().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_locally_when_remote_fails() {
        let (provider, gateway) = setup();
        gateway.sign_in("ada@example.org", "correct-horse").await.unwrap();
        provider.set_failure(IdentityOp::SignOut, Some(ProviderError::new("offline")));
        let mut events = gateway.subscribe();

        gateway.sign_out().await;
        assert!(gateway.current_session().is_none());
        assert_eq!(
            events.try_recv(),
            Some(SessionEvent::SignedOut {
                reason: SignOutReason::Requested
            })
        );
        assert_eq!(provider.calls(IdentityOp::SignOut), 1);
    }

    #[tokio::test]
    async fn test_invalid_refresh_token_signs_out_immediately() {
        let (provider, gateway) = setup();
        gateway.sign_in("ada@example.org", "correct-horse").await.unwrap();
        provider.revoke_refresh_tokens();
        let mut events = gateway.subscribe();

        let err = gateway.refresh_session().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RefreshTokenInvalid);
        assert!(gateway.current_session().is_none());
        assert_eq!(
            events.try_recv(),
            Some(SessionEvent::SignedOut {
                reason: SignOutReason::RefreshTokenInvalid
            })
        );
    }

    #[tokio::test]
    async fn test_refresh_token_error_on_get_user_signs_out() {
        let (provider, gateway) = setup();
        gateway.sign_in("ada@example.org", "correct-horse").await.unwrap();
        provider.set_failure(
            IdentityOp::GetUser,
            Some(ProviderError::new("Invalid Refresh Token: Refresh Token Not Found").with_status(400)),
        );
        let mut events = gateway.subscribe();

        let err = gateway.fetch_user().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RefreshTokenInvalid);
        assert!(gateway.current_session().is_none());
        assert_eq!(
            events.try_recv(),
            Some(SessionEvent::SignedOut {
                reason: SignOutReason::RefreshTokenInvalid
            })
        );
    }

    #[tokio::test]
    async fn test_other_provider_errors_keep_session() {
        let (provider, gateway) = setup();
        gateway.sign_in("ada@example.org", "correct-horse").await.unwrap();
        provider.set_failure(
            IdentityOp::GetUser,
            Some(ProviderError::new("User not found").with_status(404)),
        );

        let err = gateway.fetch_user().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(gateway.current_session().is_some());
    }

    #[tokio::test]
    async fn test_get_session_refreshes_expired_session() {
        let (provider, gateway) = setup();
        provider.set_session_ttl(-10);
        let (_, first) = gateway.sign_in("ada@example.org", "correct-horse").await.unwrap();
        provider.set_session_ttl(3600);

        let session = gateway.get_session().await.unwrap().unwrap();
        assert_ne!(session.access_token, first.access_token);
        assert!(!session.is_expired());
        assert_eq!(provider.calls(IdentityOp::Refresh), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_rotate_once() {
        let (provider, gateway) = setup();
        gateway.sign_in("ada@example.org", "correct-horse").await.unwrap();
        provider.set_delay(IdentityOp::Refresh, Duration::from_millis(20));

        let (a, b) = tokio::join!(gateway.refresh_session(), gateway.refresh_session());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(provider.calls(IdentityOp::Refresh), 1);
    }

    #[tokio::test]
    async fn test_unsubscribed_listener_gets_nothing() {
        let (_provider, gateway) = setup();
        let events = gateway.subscribe();
        events.unsubscribe();
        let mut later = gateway.subscribe();
        gateway.sign_in("ada@example.org", "correct-horse").await.unwrap();
        assert!(matches!(later.try_recv(), Some(SessionEvent::SignedIn { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_renews_expiring_session() {
        let (provider, gateway) = setup();
        provider.set_session_ttl(30);
        gateway.sign_in("ada@example.org", "correct-horse").await.unwrap();
        provider.set_session_ttl(3600);
        let mut events = gateway.subscribe();

        let handle = gateway.start_auto_refresh(Duration::from_secs(10), Duration::from_secs(60));
        let event = events.recv().await;
        assert!(matches!(event, Some(SessionEvent::TokenRefreshed { .. })));
        handle.abort();
    }
}
