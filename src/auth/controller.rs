//! Auth session controller.
//!
//! The single owner of [`AuthState`]. Sign-in style operations (sign-up,
//! password sign-in, authorization-code exchange) are mutually exclusive; a
//! second one started while the first is pending is rejected without
//! touching state. Sign-out always wins: it bumps an epoch, and any operation
//! that started under an older epoch drops its result instead of applying
//! it.
//!
//! State changes are published on a [`watch`] channel. Each change is applied
//! as one atomic replacement, so observers never see a half-updated state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::callback::{CallbackAction, CallbackLiveness, CallbackParams};
use super::claims::merge_claims;
use super::exchange::TokenExchangeClient;
use super::gateway::{IdentityGateway, SessionEvent, SessionSubscription, SignOutReason, SignUpResult};
use super::persistence::{LoadResult, PersistedSession, SessionStore};
use super::pkce::PkcePair;
use super::state::{AuthState, AuthStatus, SurfacedError};
use super::types::{
    ClaimSet, EnhancedToken, ProfileSeed, ProfileUpdate, Session, TokenType, TokenValidation, User,
    UserProfile,
};
use crate::adapters::{FileKeyValueStore, HttpIdentityProvider, HttpProfileStore, ReqwestHttpClient};
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult, ErrorContext, ErrorKind};
use crate::recovery::{ErrorRecord, RecoveryManager};
use crate::traits::{HttpClient, IdentityProvider, KeyValueStore, ProfileStore, StorageError};

const COMPONENT: &str = "auth_controller";

/// Collaborators the controller drives.
pub struct AuthServices {
    pub provider: Arc<dyn IdentityProvider>,
    pub exchange: TokenExchangeClient,
    pub profiles: Arc<dyn ProfileStore>,
    pub storage: Arc<dyn KeyValueStore>,
}

impl AuthServices {
    /// Production adapters: HTTP provider, exchange and profile store, file storage.
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
        let storage = match config.storage_dir {
            Some(ref dir) => FileKeyValueStore::new(dir.clone()),
            None => FileKeyValueStore::in_home()?,
        };

        Ok(Self {
            provider: Arc::new(HttpIdentityProvider::new(
                Arc::clone(&http),
                config.provider_url.clone(),
                config.anon_key.clone(),
            )),
            exchange: TokenExchangeClient::new(
                Arc::clone(&http),
                &config.exchange_base_url(),
                &config.exchange_function,
                config.anon_key.clone(),
            ),
            profiles: Arc::new(HttpProfileStore::new(
                http,
                config.provider_url.clone(),
                config.anon_key.clone(),
                config.profile_table.clone(),
            )),
            storage: Arc::new(storage),
        })
    }
}

/// Result of [`AuthSessionController::sign_up`].
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    Authenticated(Box<AuthState>),
    /// Account created; the provider wants the e-mail confirmed first.
    PendingConfirmation { email: String },
}

struct Inner {
    config: AuthConfig,
    gateway: Arc<IdentityGateway>,
    exchange: TokenExchangeClient,
    profiles: Arc<dyn ProfileStore>,
    store: SessionStore,
    recovery: RecoveryManager,
    state: watch::Sender<AuthState>,
    in_flight: AtomicBool,
    epoch: AtomicU64,
    refresh_lock: tokio::sync::Mutex<()>,
}

/// Releases the sign-in slot when dropped.
struct AttemptGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// What an operation started under; checked before applying its result.
struct Ticket {
    epoch: u64,
    liveness: Option<CallbackLiveness>,
}

/// Coordinates sign-in flows, token lifecycle and persistence.
///
/// Cheap to clone; clones share the same state.
///
/// # Example
///
/// ```ignore
/// use civic_auth::auth::AuthSessionController;
/// use civic_auth::config::AuthConfig;
///
/// let controller = AuthSessionController::from_config(AuthConfig::from_env()?)?;
/// controller.restore_session().await?;
/// let state = controller.sign_in("ada@example.org", "correct-horse").await?;
/// println!("tier: {}", state.tier());
/// ```
#[derive(Clone)]
pub struct AuthSessionController {
    inner: Arc<Inner>,
}

impl AuthSessionController {
    pub fn new(services: AuthServices, config: AuthConfig) -> Self {
        let store = SessionStore::new(services.storage, config.storage_namespace.clone());
        let recovery = RecoveryManager::new(config.history_limit);
        let (state, _) = watch::channel(AuthState::default());

        Self {
            inner: Arc::new(Inner {
                gateway: Arc::new(IdentityGateway::new(services.provider)),
                exchange: services.exchange,
                profiles: services.profiles,
                store,
                recovery,
                state,
                in_flight: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                refresh_lock: tokio::sync::Mutex::new(()),
                config,
            }),
        }
    }

    /// Validate `config` and wire up the production adapters.
    pub fn from_config(config: AuthConfig) -> AuthResult<Self> {
        config.validate()?;
        let services = AuthServices::from_config(&config)?;
        Ok(Self::new(services, config))
    }

    /// Current state snapshot.
    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    /// Observe state changes.
    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    /// Provider session events.
    pub fn subscribe(&self) -> SessionSubscription {
        self.inner.gateway.subscribe()
    }

    pub fn gateway(&self) -> &Arc<IdentityGateway> {
        &self.inner.gateway
    }

    pub fn exchange_client(&self) -> &TokenExchangeClient {
        &self.inner.exchange
    }

    pub fn profile_store(&self) -> &Arc<dyn ProfileStore> {
        &self.inner.profiles
    }

    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    /// Recent errors, oldest first.
    pub fn error_history(&self) -> Vec<ErrorRecord> {
        self.inner.recovery.history()
    }

    // ------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------

    /// Come back authenticated from storage without a network call.
    ///
    /// Expired, corrupt or unreadable envelopes leave the controller idle
    /// (and are purged). With `revalidate_on_restore`, the provider is asked
    /// in the background whether the session is still good.
    pub async fn restore_session(&self) -> AuthResult<AuthStatus> {
        let loaded = match self.inner.store.load().await {
            Ok(result) => result,
            Err(e) => {
                warn!("Could not read persisted session, starting signed out: {}", e);
                LoadResult::Absent
            }
        };

        let persisted = match loaded {
            LoadResult::Loaded(persisted) => *persisted,
            other => {
                debug!(result = ?other, "No session to restore");
                self.inner.state.send_modify(|s| s.reset());
                return Ok(AuthStatus::Idle);
            }
        };

        let epoch = self.current_epoch();
        let user_id = persisted.user.id.clone();
        self.inner
            .gateway
            .restore(persisted.user.clone(), persisted.session.clone());
        let token_error = persisted
            .token
            .is_none()
            .then(|| missing_token_error("restore_session"));

        self.inner.state.send_modify(|s| {
            s.user = Some(persisted.user);
            s.profile = persisted.profile;
            s.token = persisted.token;
            s.session = Some(persisted.session);
            s.status = AuthStatus::Authenticated;
            s.error = None;
            s.token_error = token_error;
        });
        info!(user_id = %user_id, "Session restored");

        if self.inner.config.revalidate_on_restore {
            let controller = self.clone();
            tokio::spawn(async move { controller.revalidate(epoch).await });
        }
        Ok(AuthStatus::Authenticated)
    }

    async fn revalidate(&self, epoch: u64) {
        let ticket = Ticket {
            epoch,
            liveness: None,
        };
        let gateway = &*self.inner.gateway;
        let result = self
            .inner
            .recovery
            .execute(context("revalidate_session"), move || gateway.fetch_user())
            .await;
        if self.check(&ticket).is_err() {
            return;
        }

        match result {
            Ok(user) => {
                let session = gateway.current_session();
                let _ = self.apply_if_current(&ticket, |s| {
                    if s.is_authenticated() {
                        s.user = Some(user);
                        if session.is_some() {
                            s.session = session;
                        }
                    }
                });
                let threshold = self.threshold();
                let stale = self
                    .inner
                    .state
                    .borrow()
                    .token
                    .as_ref()
                    .map_or(true, |t| t.expires_within(threshold));
                if stale {
                    if let Err(e) = self.refresh_with(None, true).await {
                        debug!("Token refresh after restore failed: {}", e);
                    }
                } else {
                    self.persist_current(&ticket).await;
                }
                debug!("Restored session revalidated");
            }
            Err(err) if err.requires_reauth() => {
                info!("Restored session no longer valid: {}", err);
                self.force_reset(&err, "revalidate_session").await;
            }
            Err(err) => warn!("Could not revalidate restored session: {}", err),
        }
    }

    // ------------------------------------------------------------------
    // Sign-in flows
    // ------------------------------------------------------------------

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        seed: &ProfileSeed,
    ) -> AuthResult<SignUpOutcome> {
        let (_guard, ticket) = self.begin_attempt("sign_up")?;
        self.mark_authenticating(true);

        let gateway = &*self.inner.gateway;
        let result = self
            .inner
            .recovery
            .execute(context("sign_up"), move || gateway.sign_up(email, password, seed))
            .await;

        match result {
            Err(err) => Err(self.fail_attempt(&ticket, err, "sign_up").await),
            Ok(SignUpResult::PendingConfirmation { user }) => {
                self.apply_if_current(&ticket, |s| {
                    settle_status(s);
                    s.login_attempt_count = 0;
                })?;
                Ok(SignUpOutcome::PendingConfirmation {
                    email: user.email.unwrap_or_else(|| email.to_string()),
                })
            }
            Ok(SignUpResult::Authenticated { user, session }) => {
                self.seed_profile(&user, &session, seed).await;
                let state = self
                    .establish(&ticket, user, session, TokenType::SessionExchange, "sign_up")
                    .await?;
                Ok(SignUpOutcome::Authenticated(Box::new(state)))
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthState> {
        let (_guard, ticket) = self.begin_attempt("sign_in")?;
        self.mark_authenticating(true);

        let gateway = &*self.inner.gateway;
        let result = self
            .inner
            .recovery
            .execute(context("sign_in"), move || gateway.sign_in(email, password))
            .await;

        match result {
            Ok((user, session)) => {
                self.establish(&ticket, user, session, TokenType::SessionExchange, "sign_in")
                    .await
            }
            Err(err) => Err(self.fail_attempt(&ticket, err, "sign_in").await),
        }
    }

    /// Send a passwordless sign-in link. The PKCE verifier stays in storage
    /// until the link comes back through [`handle_callback`](Self::handle_callback).
    pub async fn sign_in_with_passwordless_link(&self, email: &str) -> AuthResult<()> {
        let (_guard, ticket) = self.begin_attempt("passwordless_link")?;
        self.mark_authenticating(false);

        let pkce = PkcePair::generate();
        if let Err(e) = self.inner.store.store_verifier(&pkce.verifier).await {
            return Err(self
                .fail_attempt(&ticket, e.into(), "passwordless_link")
                .await);
        }

        let gateway = &*self.inner.gateway;
        let challenge = pkce.challenge.as_str();
        let redirect = self.inner.config.redirect_url.as_deref();
        let result = self
            .inner
            .recovery
            .execute(context("passwordless_link"), move || {
                gateway.send_magic_link(email, challenge, redirect)
            })
            .await;

        match result {
            Ok(()) => {
                self.apply_if_current(&ticket, settle_status)?;
                info!("Sign-in link sent");
                Ok(())
            }
            Err(err) => Err(self.fail_attempt(&ticket, err, "passwordless_link").await),
        }
    }

    /// Exchange an authorization code from a sign-in link.
    ///
    /// A code is attempted at most once per controller; a repeat returns
    /// [`AuthError::CodeAlreadyUsed`] without touching state.
    pub async fn exchange_authorization_code(&self, code: &str) -> AuthResult<AuthState> {
        self.exchange_code(code, None).await
    }

    /// Handle a redirect URL from the provider.
    ///
    /// Returns `Ok(None)` when the URL carries neither a code nor an error.
    /// If `liveness` is cancelled before the exchange completes, the result
    /// is discarded and `AuthError::Abandoned` returned.
    pub async fn handle_callback(
        &self,
        url: &str,
        liveness: &CallbackLiveness,
    ) -> AuthResult<Option<AuthState>> {
        match CallbackParams::parse(url).action() {
            CallbackAction::Nothing => {
                debug!("Callback carried no code or error");
                Ok(None)
            }
            CallbackAction::Reject { error, description } => {
                let err = AuthError::LinkRejected { error, description };
                warn!("Sign-in link rejected: {}", err);
                let surfaced = SurfacedError::from_error(&err, "handle_callback");
                self.inner.state.send_modify(|s| {
                    if !s.is_authenticated() {
                        s.reset();
                        s.status = AuthStatus::Error;
                    }
                    s.error = Some(surfaced);
                });
                Err(err)
            }
            CallbackAction::Exchange(code) => {
                if !liveness.is_alive() {
                    return Err(AuthError::Abandoned);
                }
                self.exchange_code(&code, Some(liveness.clone()))
                    .await
                    .map(Some)
            }
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        liveness: Option<CallbackLiveness>,
    ) -> AuthResult<AuthState> {
        let (_guard, mut ticket) = self.begin_attempt("exchange_code")?;
        ticket.liveness = liveness;

        if !self.inner.store.mark_code_used(code) {
            warn!("Authorization code already used, not exchanging it again");
            return Err(AuthError::CodeAlreadyUsed);
        }
        self.mark_authenticating(true);

        let verifier = match self.inner.store.take_verifier().await {
            Ok(Some(verifier)) => verifier,
            Ok(None) => {
                return Err(self
                    .fail_attempt(&ticket, AuthError::MissingCodeVerifier, "exchange_code")
                    .await)
            }
            Err(e) => return Err(self.fail_attempt(&ticket, e.into(), "exchange_code").await),
        };
        if let Err(stale) = self.check(&ticket) {
            return Err(self.settle_stale(stale));
        }

        // Single-use code: never retried.
        let result = self
            .inner
            .gateway
            .exchange_authorization_code(code, &verifier)
            .await;
        match result {
            Ok((user, session)) => {
                self.establish(
                    &ticket,
                    user,
                    session,
                    TokenType::AuthorizationCodeExchange,
                    "exchange_code",
                )
                .await
            }
            Err(err) => Err(self.fail_attempt(&ticket, err, "exchange_code").await),
        }
    }

    /// Sign out. Always ends idle, even if the provider cannot be reached.
    pub async fn sign_out(&self) -> AuthResult<()> {
        info!("Signing out");
        let cleared = self.reset_local(None).await;
        self.inner.gateway.sign_out().await;
        cleared.map_err(AuthError::from)
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    /// Re-mint the enhanced token, optionally with extra claims.
    ///
    /// Refreshes the provider session first if it is close to expiring.
    /// Concurrent calls are serialized.
    pub async fn refresh_token(&self, claims: Option<ClaimSet>) -> AuthResult<EnhancedToken> {
        self.refresh_with(claims.as_ref(), false).await
    }

    /// Current enhanced token, refreshed first if it expires within the
    /// configured threshold.
    pub async fn ensure_fresh_token(&self) -> AuthResult<EnhancedToken> {
        let (authenticated, token) = {
            let state = self.inner.state.borrow();
            (state.is_authenticated(), state.token.clone())
        };
        if !authenticated {
            return Err(AuthError::NotAuthenticated);
        }
        match token {
            Some(token) if !token.expires_within(self.threshold()) => Ok(token),
            _ => self.refresh_with(None, true).await,
        }
    }

    /// Check a token with the exchange service. Defaults to the current
    /// enhanced token. Never changes state.
    pub async fn validate_token(&self, token: Option<&str>) -> AuthResult<TokenValidation> {
        let token = match token {
            Some(token) => token.to_string(),
            None => self
                .inner
                .state
                .borrow()
                .token
                .as_ref()
                .map(|t| t.token.clone())
                .ok_or(AuthError::NotAuthenticated)?,
        };
        let session = self
            .inner
            .gateway
            .current_session()
            .ok_or(AuthError::NotAuthenticated)?;

        let exchange = &self.inner.exchange;
        let access_token = session.access_token.as_str();
        let token = token.as_str();
        self.inner
            .recovery
            .execute(context("validate_token"), move || {
                exchange.validate(access_token, token)
            })
            .await
    }

    async fn refresh_with(
        &self,
        overrides: Option<&ClaimSet>,
        only_if_stale: bool,
    ) -> AuthResult<EnhancedToken> {
        if !self.inner.state.borrow().is_authenticated() {
            return Err(AuthError::NotAuthenticated);
        }
        let _serial = self.inner.refresh_lock.lock().await;

        let threshold = self.threshold();
        let ticket = Ticket {
            epoch: self.current_epoch(),
            liveness: None,
        };
        {
            let state = self.inner.state.borrow();
            if !state.is_authenticated() {
                return Err(AuthError::NotAuthenticated);
            }
            // Another caller refreshed while we waited on the lock.
            if only_if_stale {
                if let Some(token) = state.token.as_ref().filter(|t| !t.expires_within(threshold)) {
                    return Ok(token.clone());
                }
            }
        }

        let inner = &*self.inner;
        let ctx = context("refresh_token").with_refresh_token();
        let result = inner
            .recovery
            .execute(ctx.clone(), move || async move {
                let session = inner.gateway.refresh_if_expiring(threshold).await?;
                let (user, profile) = {
                    let state = inner.state.borrow();
                    (state.user.clone(), state.profile.clone())
                };
                let user = user.ok_or(AuthError::NotAuthenticated)?;
                let claims = merge_claims(&user, profile.as_ref(), overrides);
                inner.exchange.refresh(&session.access_token, &claims).await
            })
            .await;

        match result {
            Ok(token) => {
                let session = inner.gateway.current_session();
                self.apply_if_current(&ticket, |s| {
                    s.token = Some(token.clone());
                    s.token_error = None;
                    if session.is_some() {
                        s.session = session;
                    }
                })?;
                self.persist_current(&ticket).await;
                debug!(expires_at = token.expires_at, "Enhanced token refreshed");
                Ok(token)
            }
            Err(err) => {
                self.check(&ticket)?;
                let Some(outcome) = err.outcome().cloned() else {
                    return Err(err);
                };
                if outcome.requires_reauth() {
                    self.force_reset(&err, "refresh_token").await;
                } else {
                    let surfaced = SurfacedError::from_outcome(&outcome, err.error_code());
                    self.apply_if_current(&ticket, |s| {
                        if s.token.as_ref().is_some_and(|t| t.is_expired()) {
                            s.token = None;
                        }
                        s.token_error = Some(surfaced);
                    })?;
                }
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Profile and account
    // ------------------------------------------------------------------

    /// Update the cached profile, then re-mint the token so its claims
    /// follow. A failed re-mint does not fail the update.
    pub async fn update_profile(&self, changes: ProfileUpdate) -> AuthResult<UserProfile> {
        let (user, current) = {
            let state = self.inner.state.borrow();
            if !state.is_authenticated() {
                return Err(AuthError::NotAuthenticated);
            }
            match state.user.clone() {
                Some(user) => (user, state.profile.clone()),
                None => return Err(AuthError::NotAuthenticated),
            }
        };
        let ticket = Ticket {
            epoch: self.current_epoch(),
            liveness: None,
        };

        let inner = &*self.inner;
        let user_id = user.id.as_str();
        let changes_ref = &changes;
        let current_ref = current.as_ref();
        let ctx = context("update_profile").with_user_id(user_id);
        let result = inner
            .recovery
            .execute(ctx, move || async move {
                let session = inner
                    .gateway
                    .get_session()
                    .await?
                    .ok_or(AuthError::NotAuthenticated)?;
                let stored = match current_ref {
                    Some(_) => {
                        inner
                            .profiles
                            .update(user_id, changes_ref, &session.access_token)
                            .await
                    }
                    None => {
                        let mut profile = UserProfile {
                            id: user_id.to_string(),
                            ..Default::default()
                        };
                        profile.apply(changes_ref);
                        inner.profiles.upsert(&profile, &session.access_token).await
                    }
                };
                stored.map_err(AuthError::from)
            })
            .await;

        match result {
            Ok(profile) => {
                self.apply_if_current(&ticket, |s| s.profile = Some(profile.clone()))?;
                self.persist_current(&ticket).await;
                info!(user_id = %user.id, complete = profile.is_complete(), "Profile updated");
                if let Err(e) = self.refresh_token(None).await {
                    warn!("Profile saved but token refresh failed: {}", e);
                }
                Ok(profile)
            }
            Err(err) => {
                self.check(&ticket)?;
                if err.requires_reauth() {
                    self.force_reset(&err, "update_profile").await;
                } else {
                    let surfaced = SurfacedError::from_error(&err, "update_profile");
                    self.apply_if_current(&ticket, |s| s.error = Some(surfaced))?;
                }
                Err(err)
            }
        }
    }

    /// Ask the provider to send a password-reset e-mail.
    pub async fn request_password_reset(&self, email: &str) -> AuthResult<()> {
        let gateway = &*self.inner.gateway;
        let redirect = self.inner.config.redirect_url.as_deref();
        self.inner
            .recovery
            .execute(context("reset_password"), move || {
                gateway.reset_password(email, redirect)
            })
            .await?;
        info!("Password reset requested");
        Ok(())
    }

    /// Dismiss the surfaced error. An errored controller goes back to idle.
    pub fn clear_error(&self) {
        self.inner.state.send_if_modified(|s| {
            let had_error = s.error.take().is_some();
            if s.status == AuthStatus::Error {
                s.status = AuthStatus::Idle;
                return true;
            }
            had_error
        });
    }

    // ------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------

    /// Keep the enhanced token fresh while authenticated.
    ///
    /// The task holds only a weak reference and ends once every controller
    /// clone is dropped.
    pub fn spawn_auto_refresh(&self, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("Controller dropped, stopping token auto refresh");
                    break;
                };
                let controller = AuthSessionController { inner };
                if !controller.inner.state.borrow().is_authenticated() {
                    continue;
                }
                if let Err(e) = controller.ensure_fresh_token().await {
                    warn!("Automatic token refresh failed: {}", e);
                }
            }
        })
    }

    /// Follow provider session events that did not come from the controller
    /// itself, such as a background session refresh or a revoked refresh
    /// token.
    pub fn spawn_session_listener(&self) -> JoinHandle<()> {
        let mut events = self.inner.gateway.subscribe();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                AuthSessionController { inner }
                    .apply_session_event(event)
                    .await;
            }
            debug!("Session listener stopped");
        })
    }

    async fn apply_session_event(&self, event: SessionEvent) {
        let ticket = Ticket {
            epoch: self.current_epoch(),
            liveness: None,
        };
        match event {
            SessionEvent::TokenRefreshed { session } => {
                let changed = self.inner.state.send_if_modified(|s| {
                    if s.is_authenticated() && s.session.as_ref() != Some(&session) {
                        s.session = Some(session);
                        return true;
                    }
                    false
                });
                if changed {
                    self.persist_current(&ticket).await;
                }
            }
            SessionEvent::UserUpdated { user } => {
                let changed = self.inner.state.send_if_modified(|s| {
                    let same_user = s.user.as_ref().is_some_and(|u| u.id == user.id && *u != user);
                    if same_user {
                        s.user = Some(user);
                    }
                    same_user
                });
                if changed {
                    self.persist_current(&ticket).await;
                }
            }
            SessionEvent::SignedOut { reason } => {
                if self.inner.gateway.current_session().is_some()
                    || !self.inner.state.borrow().is_authenticated()
                {
                    return;
                }
                info!(?reason, "Provider session ended");
                let error = match reason {
                    SignOutReason::Requested => None,
                    SignOutReason::RefreshTokenInvalid => Some(SurfacedError {
                        kind: ErrorKind::RefreshTokenInvalid,
                        message: ErrorKind::RefreshTokenInvalid.user_message().to_string(),
                        code: "E_AUTH_PROVIDER".to_string(),
                        operation: "refresh_session".to_string(),
                        requires_reauth: true,
                    }),
                };
                if let Err(e) = self.reset_local(error).await {
                    warn!("Failed to clear persisted session: {}", e);
                }
            }
            SessionEvent::SignedIn { .. } => {}
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn current_epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    fn threshold(&self) -> i64 {
        i64::try_from(self.inner.config.refresh_threshold_secs).unwrap_or(i64::MAX / 2)
    }

    fn begin_attempt(&self, operation: &str) -> AuthResult<(AttemptGuard<'_>, Ticket)> {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(operation, "Rejected: another sign-in operation is in flight");
            return Err(AuthError::OperationInProgress);
        }
        let guard = AttemptGuard {
            flag: &self.inner.in_flight,
        };
        let ticket = Ticket {
            epoch: self.current_epoch(),
            liveness: None,
        };
        Ok((guard, ticket))
    }

    fn mark_authenticating(&self, count_attempt: bool) {
        self.inner.state.send_modify(|s| {
            s.status = AuthStatus::Authenticating;
            s.error = None;
            if count_attempt {
                s.login_attempt_count = s.login_attempt_count.saturating_add(1);
            }
        });
    }

    fn check(&self, ticket: &Ticket) -> AuthResult<()> {
        if self.current_epoch() != ticket.epoch {
            return Err(AuthError::Superseded);
        }
        if ticket.liveness.as_ref().is_some_and(|l| !l.is_alive()) {
            return Err(AuthError::Abandoned);
        }
        Ok(())
    }

    /// Apply `f` only if `ticket` is still current, under the state lock.
    fn apply_if_current(&self, ticket: &Ticket, f: impl FnOnce(&mut AuthState)) -> AuthResult<()> {
        let mut result = Ok(());
        self.inner.state.send_if_modified(|s| match self.check(ticket) {
            Ok(()) => {
                f(s);
                true
            }
            Err(e) => {
                result = Err(e);
                false
            }
        });
        result
    }

    /// Fetch the profile, profile-store failures are non-fatal.
    async fn load_profile(&self, user: &User, session: &Session) -> Option<UserProfile> {
        let profiles = &self.inner.profiles;
        let user_id = user.id.as_str();
        let access_token = session.access_token.as_str();
        let ctx = context("fetch_profile").with_user_id(user_id);
        let result = self
            .inner
            .recovery
            .execute(ctx, move || async move {
                profiles
                    .fetch(user_id, access_token)
                    .await
                    .map_err(AuthError::from)
            })
            .await;
        match result {
            Ok(profile) => profile,
            Err(err) => {
                warn!(user_id, "Profile unavailable, continuing without it: {}", err);
                None
            }
        }
    }

    async fn seed_profile(&self, user: &User, session: &Session, seed: &ProfileSeed) {
        let profiles = &self.inner.profiles;
        let profile = UserProfile::from_seed(&user.id, seed);
        let access_token = session.access_token.as_str();
        let profile_ref = &profile;
        let ctx = context("create_profile").with_user_id(&user.id);
        let result = self
            .inner
            .recovery
            .execute(ctx, move || async move {
                profiles
                    .upsert(profile_ref, access_token)
                    .await
                    .map_err(AuthError::from)
            })
            .await;
        if let Err(err) = result {
            warn!(user_id = %user.id, "Could not create profile at sign-up: {}", err);
        }
    }

    /// Finish a sign-in once the provider has produced a session: load the
    /// profile, mint the enhanced token, persist, publish.
    async fn establish(
        &self,
        ticket: &Ticket,
        user: User,
        session: Session,
        token_type: TokenType,
        operation: &str,
    ) -> AuthResult<AuthState> {
        if let Err(stale) = self.check(ticket) {
            return Err(self.discard(stale, &session, false).await);
        }

        let profile = self.load_profile(&user, &session).await;
        if let Err(stale) = self.check(ticket) {
            return Err(self.discard(stale, &session, false).await);
        }

        let claims = merge_claims(&user, profile.as_ref(), None);
        let exchange = &self.inner.exchange;
        let access_token = session.access_token.as_str();
        let claims_ref = &claims;
        let ctx = context("exchange_token").with_user_id(&user.id);
        let token_result = self
            .inner
            .recovery
            .execute(ctx, move || {
                exchange.exchange(access_token, claims_ref, token_type)
            })
            .await;
        if let Err(stale) = self.check(ticket) {
            return Err(self.discard(stale, &session, false).await);
        }

        let (token, token_error) = match token_result {
            Ok(token) => (Some(token), None),
            Err(err) => {
                warn!(user_id = %user.id, "Signed in without an enhanced token: {}", err);
                (None, Some(SurfacedError::from_error(&err, "exchange_token")))
            }
        };

        let persisted =
            PersistedSession::new(user.clone(), profile.clone(), session.clone(), token.clone());
        if let Err(e) = self.inner.store.save(&persisted).await {
            warn!("Failed to persist session: {}", e);
        }

        let now = Utc::now();
        let has_token = token.is_some();
        let user_id = user.id.clone();
        let applied = self.apply_if_current(ticket, |s| {
            s.user = Some(user);
            s.profile = profile;
            s.token = token;
            s.session = Some(session.clone());
            s.status = AuthStatus::Authenticated;
            s.error = None;
            s.token_error = token_error;
            s.login_attempt_count = 0;
            s.last_login_timestamp = Some(now);
        });
        if let Err(stale) = applied {
            return Err(self.discard(stale, &session, true).await);
        }

        info!(operation, user_id = %user_id, has_token, "Authenticated");
        Ok(self.state())
    }

    /// Drop the result of a sign-in whose ticket went stale.
    async fn discard(&self, stale: AuthError, session: &Session, persisted: bool) -> AuthError {
        debug!("Discarding stale sign-in result: {}", stale);
        let ours = self
            .inner
            .gateway
            .current_session()
            .is_some_and(|current| current.access_token == session.access_token);
        if ours {
            self.inner.gateway.sign_out().await;
        }
        if persisted {
            if let Err(e) = self.inner.store.clear().await {
                warn!("Failed to clear discarded session: {}", e);
            }
        }
        self.settle_stale(stale)
    }

    fn settle_stale(&self, stale: AuthError) -> AuthError {
        if matches!(stale, AuthError::Abandoned) {
            let provider_session = self.inner.gateway.current_session().is_some();
            self.inner.state.send_modify(|s| {
                if s.status == AuthStatus::Authenticating {
                    if provider_session {
                        settle_status(s);
                    } else {
                        s.reset();
                    }
                }
            });
        }
        stale
    }

    /// Run recovery for a failed sign-in and publish the error.
    async fn fail_attempt(&self, ticket: &Ticket, err: AuthError, operation: &str) -> AuthError {
        if let Err(stale) = self.check(ticket) {
            return self.settle_stale(stale);
        }
        if matches!(
            err.inner(),
            AuthError::Superseded | AuthError::Abandoned | AuthError::OperationInProgress
        ) {
            return self.settle_stale(err);
        }

        let outcome = self.inner.recovery.handle(&err, &context(operation)).await;
        let surfaced = SurfacedError::from_outcome(&outcome, err.error_code());
        let reauth = outcome.requires_reauth();
        if reauth || outcome.clear_session {
            self.inner.gateway.sign_out().await;
            if let Err(e) = self.inner.store.clear().await {
                warn!("Failed to clear persisted session: {}", e);
            }
        }

        let applied = self.apply_if_current(ticket, |s| {
            let keep = !reauth && s.user.is_some() && s.session.is_some();
            if keep {
                s.status = AuthStatus::Authenticated;
            } else {
                s.reset();
                s.status = AuthStatus::Error;
            }
            s.error = Some(surfaced);
        });
        if let Err(stale) = applied {
            return self.settle_stale(stale);
        }
        AuthError::Failed(Box::new(outcome))
    }

    /// Sign out locally with `err` surfaced.
    async fn force_reset(&self, err: &AuthError, operation: &str) {
        let surfaced = SurfacedError::from_error(err, operation);
        if let Err(e) = self.reset_local(Some(surfaced)).await {
            warn!("Failed to clear persisted session: {}", e);
        }
        self.inner.gateway.sign_out().await;
    }

    /// Invalidate pending operations, reset state and purge storage.
    async fn reset_local(&self, error: Option<SurfacedError>) -> Result<(), StorageError> {
        self.inner.state.send_modify(|s| {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            s.reset();
            s.status = if error.is_some() {
                AuthStatus::Error
            } else {
                AuthStatus::Idle
            };
            s.error = error;
        });
        self.inner.store.clear().await
    }

    /// Save the current identity, unless a sign-out got there first.
    async fn persist_current(&self, ticket: &Ticket) {
        let persisted = {
            let state = self.inner.state.borrow();
            match (state.is_authenticated(), &state.user, &state.session) {
                (true, Some(user), Some(session)) => PersistedSession::new(
                    user.clone(),
                    state.profile.clone(),
                    session.clone(),
                    state.token.clone(),
                ),
                _ => return,
            }
        };
        if let Err(e) = self.inner.store.save(&persisted).await {
            warn!("Failed to persist session: {}", e);
            return;
        }
        if self.check(ticket).is_err() {
            if let Err(e) = self.inner.store.clear().await {
                warn!("Failed to clear stale session: {}", e);
            }
        }
    }
}

fn context(operation: &str) -> ErrorContext {
    ErrorContext::new(operation).with_component(COMPONENT)
}

/// Back to authenticated if an identity is still held, otherwise idle.
fn settle_status(state: &mut AuthState) {
    state.status = if state.user.is_some() && state.session.is_some() {
        AuthStatus::Authenticated
    } else {
        AuthStatus::Idle
    };
}

fn missing_token_error(operation: &str) -> SurfacedError {
    SurfacedError {
        kind: ErrorKind::Token,
        message: "You're signed in, but some features are temporarily unavailable.".to_string(),
        code: "E_AUTH_TOKEN".to_string(),
        operation: operation.to_string(),
        requires_reauth: false,
    }
}
