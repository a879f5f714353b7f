//! Scripted identity provider for testing.
//!
//! Keeps accounts, sessions and pending sign-in links in memory and behaves
//! like a GoTrue-style provider: rotating refresh tokens, single-use
//! authorization codes bound to a PKCE challenge, provider-shaped error
//! messages. Every operation can be delayed or made to fail.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::auth::pkce::code_challenge;
use crate::auth::types::{ProviderAuthResponse, Session, SignInMethod, User};
use crate::traits::{IdentityProvider, ProviderError};

/// Provider operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityOp {
    SignUp,
    SignIn,
    MagicLink,
    ExchangeCode,
    Refresh,
    GetUser,
    SignOut,
    ResetPassword,
    Health,
}

#[derive(Debug, Clone)]
struct Account {
    password: String,
    user: User,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<String, Account>,
    /// access token -> user id
    access_tokens: HashMap<String, String>,
    /// live refresh token -> user id
    refresh_tokens: HashMap<String, String>,
    /// refresh tokens already rotated away
    used_refresh_tokens: Vec<String>,
    /// email -> code challenge of the last link sent
    link_challenges: HashMap<String, String>,
    /// code -> (email, challenge)
    codes: HashMap<String, (String, String)>,
    used_codes: Vec<String>,
    reset_requests: Vec<String>,
    failures: HashMap<IdentityOp, ProviderError>,
    one_shot_failures: HashMap<IdentityOp, Vec<ProviderError>>,
    delays: HashMap<IdentityOp, Duration>,
    calls: HashMap<IdentityOp, usize>,
    counter: u64,
    require_confirmation: bool,
    session_ttl_secs: i64,
}

/// In-memory identity provider double.
///
/// # Example
///
/// ```ignore
/// use civic_auth::adapters::mock::{IdentityOp, MockIdentityProvider};
///
/// let provider = MockIdentityProvider::new();
/// provider.add_user("ada@example.org", "correct-horse");
/// provider.fail_next(IdentityOp::Refresh, ProviderError::new("offline"));
/// assert_eq!(provider.calls(IdentityOp::SignIn), 0);
/// ```
#[derive(Debug, Clone)]
pub struct MockIdentityProvider {
    state: Arc<Mutex<State>>,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        let state = State {
            session_ttl_secs: 3600,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Register a confirmed account and return its user.
    pub fn add_user(&self, email: &str, password: &str) -> User {
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let user = User {
            id: format!("user-{}", state.counter),
            email: Some(email.to_string()),
            email_verified: true,
            role: "authenticated".to_string(),
            metadata: serde_json::Value::Null,
        };
        state.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        user
    }

    /// Sign-ups return no session until the e-mail is confirmed.
    pub fn set_require_confirmation(&self, required: bool) {
        self.state.lock().unwrap().require_confirmation = required;
    }

    /// Lifetime of issued sessions. Negative values issue expired sessions.
    pub fn set_session_ttl(&self, secs: i64) {
        self.state.lock().unwrap().session_ttl_secs = secs;
    }

    /// Fail every call to `op` until cleared.
    pub fn set_failure(&self, op: IdentityOp, error: Option<ProviderError>) {
        let mut state = self.state.lock().unwrap();
        match error {
            Some(error) => state.failures.insert(op, error),
            None => state.failures.remove(&op),
        };
    }

    /// Fail the next call to `op` only.
    pub fn fail_next(&self, op: IdentityOp, error: ProviderError) {
        self.state
            .lock()
            .unwrap()
            .one_shot_failures
            .entry(op)
            .or_default()
            .push(error);
    }

    /// Delay every call to `op`.
    pub fn set_delay(&self, op: IdentityOp, delay: Duration) {
        self.state.lock().unwrap().delays.insert(op, delay);
    }

    pub fn calls(&self, op: IdentityOp) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    /// Authorization code for the last link sent to `email`, as the user
    /// would find it in the redirect URL.
    pub fn issue_code(&self, email: &str) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        let challenge = state.link_challenges.get(email)?.clone();
        state.counter += 1;
        let code = format!("code-{}", state.counter);
        state
            .codes
            .insert(code.clone(), (email.to_string(), challenge));
        Some(code)
    }

    /// Revoke all refresh tokens, as a provider-side logout elsewhere would.
    pub fn revoke_refresh_tokens(&self) {
        let mut state = self.state.lock().unwrap();
        let revoked: Vec<String> = state.refresh_tokens.drain().map(|(t, _)| t).collect();
        state.used_refresh_tokens.extend(revoked);
    }

    pub fn reset_requests(&self) -> Vec<String> {
        self.state.lock().unwrap().reset_requests.clone()
    }

    pub fn active_sessions(&self) -> usize {
        self.state.lock().unwrap().access_tokens.len()
    }

    /// Count the call, apply delay, then check injected failures.
    async fn enter(&self, op: IdentityOp) -> Result<(), ProviderError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(op).or_insert(0) += 1;
            state.delays.get(&op).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(queue) = state.one_shot_failures.get_mut(&op) {
            if !queue.is_empty() {
                return Err(queue.remove(0));
            }
        }
        match state.failures.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn issue_session(state: &mut State, user_id: &str, method: SignInMethod) -> Session {
        state.counter += 1;
        let n = state.counter;
        let session = Session {
            access_token: format!("access-{}", n),
            refresh_token: format!("refresh-{}", n),
            expires_at: Utc::now().timestamp() + state.session_ttl_secs,
            token_type: "bearer".to_string(),
            method,
        };
        state
            .access_tokens
            .insert(session.access_token.clone(), user_id.to_string());
        state
            .refresh_tokens
            .insert(session.refresh_token.clone(), user_id.to_string());
        session
    }

    fn user_by_id(state: &State, user_id: &str) -> Option<User> {
        state
            .accounts
            .values()
            .find(|a| a.user.id == user_id)
            .map(|a| a.user.clone())
    }
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &serde_json::Value,
    ) -> Result<ProviderAuthResponse, ProviderError> {
        self.enter(IdentityOp::SignUp).await?;
        let mut state = self.state.lock().unwrap();

        if state.accounts.contains_key(email) {
            return Err(ProviderError::new("User already registered")
                .with_status(422)
                .with_code("user_already_exists"));
        }
        if password.len() < 6 {
            return Err(
                ProviderError::new("Password should be at least 6 characters.")
                    .with_status(422)
                    .with_code("weak_password"),
            );
        }

        state.counter += 1;
        let user = User {
            id: format!("user-{}", state.counter),
            email: Some(email.to_string()),
            email_verified: !state.require_confirmation,
            role: "authenticated".to_string(),
            metadata: metadata.clone(),
        };
        state.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );

        let session = if state.require_confirmation {
            None
        } else {
            Some(Self::issue_session(&mut state, &user.id, SignInMethod::Password))
        };
        Ok(ProviderAuthResponse { user, session })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderAuthResponse, ProviderError> {
        self.enter(IdentityOp::SignIn).await?;
        let mut state = self.state.lock().unwrap();

        let user = match state.accounts.get(email) {
            Some(account) if account.password == password => account.user.clone(),
            _ => {
                return Err(ProviderError::new("Invalid login credentials")
                    .with_status(400)
                    .with_code("invalid_credentials"))
            }
        };
        if !user.email_verified {
            return Err(ProviderError::new("Email not confirmed")
                .with_status(400)
                .with_code("email_not_confirmed"));
        }
        let session = Self::issue_session(&mut state, &user.id, SignInMethod::Password);
        Ok(ProviderAuthResponse {
            user,
            session: Some(session),
        })
    }

    async fn send_magic_link(
        &self,
        email: &str,
        code_challenge: &str,
        _redirect_to: Option<&str>,
    ) -> Result<(), ProviderError> {
        self.enter(IdentityOp::MagicLink).await?;
        let mut state = self.state.lock().unwrap();
        if !state.accounts.contains_key(email) {
            state.counter += 1;
            let user = User {
                id: format!("user-{}", state.counter),
                email: Some(email.to_string()),
                email_verified: true,
                role: "authenticated".to_string(),
                metadata: serde_json::Value::Null,
            };
            state.accounts.insert(
                email.to_string(),
                Account {
                    password: String::new(),
                    user,
                },
            );
        }
        state
            .link_challenges
            .insert(email.to_string(), code_challenge.to_string());
        Ok(())
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<ProviderAuthResponse, ProviderError> {
        self.enter(IdentityOp::ExchangeCode).await?;
        let mut state = self.state.lock().unwrap();

        if state.used_codes.iter().any(|c| c == code) {
            return Err(ProviderError::new("invalid flow state, flow state has already been used")
                .with_status(400)
                .with_code("flow_state_expired"));
        }
        let Some((email, challenge)) = state.codes.get(code).cloned() else {
            return Err(ProviderError::new("invalid flow state, no valid flow state found")
                .with_status(404)
                .with_code("flow_state_not_found"));
        };
        if code_challenge(code_verifier) != challenge {
            return Err(ProviderError::new(
                "code challenge does not match previously saved code verifier",
            )
            .with_status(400)
            .with_code("bad_code_verifier"));
        }

        state.codes.remove(code);
        state.used_codes.push(code.to_string());
        let user = state
            .accounts
            .get(&email)
            .map(|a| a.user.clone())
            .ok_or_else(|| ProviderError::new("User not found").with_status(404))?;
        let session = Self::issue_session(&mut state, &user.id, SignInMethod::PasswordlessLink);
        Ok(ProviderAuthResponse {
            user,
            session: Some(session),
        })
    }

    async fn refresh_session(
        &self,
        refresh_token: &str,
    ) -> Result<ProviderAuthResponse, ProviderError> {
        self.enter(IdentityOp::Refresh).await?;
        let mut state = self.state.lock().unwrap();

        if state.used_refresh_tokens.iter().any(|t| t == refresh_token) {
            return Err(ProviderError::new("Invalid Refresh Token: Already Used")
                .with_status(400)
                .with_code("refresh_token_already_used"));
        }
        let Some(user_id) = state.refresh_tokens.remove(refresh_token) else {
            return Err(ProviderError::new("Invalid Refresh Token: Refresh Token Not Found")
                .with_status(400)
                .with_code("refresh_token_not_found"));
        };
        state.used_refresh_tokens.push(refresh_token.to_string());

        let user = Self::user_by_id(&state, &user_id)
            .ok_or_else(|| ProviderError::new("User not found").with_status(404))?;
        let session = Self::issue_session(&mut state, &user_id, SignInMethod::Password);
        Ok(ProviderAuthResponse {
            user,
            session: Some(session),
        })
    }

    async fn get_user(&self, access_token: &str) -> Result<User, ProviderError> {
        self.enter(IdentityOp::GetUser).await?;
        let state = self.state.lock().unwrap();
        state
            .access_tokens
            .get(access_token)
            .and_then(|id| Self::user_by_id(&state, id))
            .ok_or_else(|| {
                ProviderError::new("invalid JWT: unable to parse or verify signature")
                    .with_status(401)
                    .with_code("bad_jwt")
            })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        self.enter(IdentityOp::SignOut).await?;
        let mut state = self.state.lock().unwrap();
        if let Some(user_id) = state.access_tokens.remove(access_token) {
            state.refresh_tokens.retain(|_, owner| *owner != user_id);
        }
        Ok(())
    }

    async fn reset_password(
        &self,
        email: &str,
        _redirect_to: Option<&str>,
    ) -> Result<(), ProviderError> {
        self.enter(IdentityOp::ResetPassword).await?;
        self.state
            .lock()
            .unwrap()
            .reset_requests
            .push(email.to_string());
        Ok(())
    }

    async fn health(&self) -> Result<(), ProviderError> {
        self.enter(IdentityOp::Health).await
    }
}
