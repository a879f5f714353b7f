//! Persisted session envelope.
//!
//! The whole persisted session lives in one entry, `{namespace}.session`, so
//! a write either lands completely or not at all. The PKCE verifier for a
//! pending passwordless link is the only other key. Stored data is always
//! parsed and expiry-checked before it is trusted.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::types::{EnhancedToken, Session, User, UserProfile, MAX_TOKEN_LIFETIME_SECS};
use crate::recovery::purge_namespace;
use crate::traits::{KeyValueStore, StorageError};

/// Envelope format version.
pub const ENVELOPE_VERSION: u32 = 1;

/// Everything needed to come back authenticated without a network call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub version: u32,
    pub user: User,
    #[serde(default)]
    pub profile: Option<UserProfile>,
    pub session: Session,
    #[serde(default)]
    pub token: Option<EnhancedToken>,
    pub saved_at: i64,
}

impl PersistedSession {
    pub fn new(
        user: User,
        profile: Option<UserProfile>,
        session: Session,
        token: Option<EnhancedToken>,
    ) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            user,
            profile,
            session,
            token,
            saved_at: Utc::now().timestamp(),
        }
    }

    /// Expired session, expired token, or saved longer ago than a token lives.
    pub fn is_expired(&self) -> bool {
        self.session.is_expired()
            || self.token.as_ref().is_some_and(|t| t.is_expired())
            || Utc::now().timestamp() - self.saved_at > MAX_TOKEN_LIFETIME_SECS
    }
}

/// Result of reading the envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadResult {
    Loaded(Box<PersistedSession>),
    Absent,
    /// Present but expired; purged.
    Expired,
    /// Present but unreadable; purged.
    Corrupt,
}

/// Namespaced session storage.
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
    used_codes: Mutex<HashSet<String>>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            used_codes: Mutex::new(HashSet::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn session_key(&self) -> String {
        format!("{}.session", self.namespace)
    }

    pub fn verifier_key(&self) -> String {
        format!("{}.pkce_verifier", self.namespace)
    }

    pub fn backend(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    pub async fn load(&self) -> Result<LoadResult, StorageError> {
        let Some(raw) = self.store.get(&self.session_key()).await? else {
            return Ok(LoadResult::Absent);
        };

        let persisted = match serde_json::from_str::<PersistedSession>(&raw) {
            Ok(p) if p.version == ENVELOPE_VERSION => p,
            Ok(p) => {
                warn!(version = p.version, "Discarding session envelope with unknown version");
                self.clear().await?;
                return Ok(LoadResult::Corrupt);
            }
            Err(e) => {
                warn!("Discarding unreadable session envelope: {}", e);
                self.clear().await?;
                return Ok(LoadResult::Corrupt);
            }
        };

        if persisted.is_expired() {
            debug!(user_id = %persisted.user.id, "Stored session expired");
            self.clear().await?;
            return Ok(LoadResult::Expired);
        }
        Ok(LoadResult::Loaded(Box::new(persisted)))
    }

    pub async fn save(&self, persisted: &PersistedSession) -> Result<(), StorageError> {
        let json = serde_json::to_string(persisted)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.store.set(&self.session_key(), &json).await
    }

    /// Remove every key in the namespace.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let removed = purge_namespace(self.store.as_ref(), &self.namespace).await?;
        debug!(namespace = %self.namespace, removed, "Cleared persisted session");
        Ok(())
    }

    pub async fn store_verifier(&self, verifier: &str) -> Result<(), StorageError> {
        self.store.set(&self.verifier_key(), verifier).await
    }

    /// Read and delete the pending PKCE verifier.
    pub async fn take_verifier(&self) -> Result<Option<String>, StorageError> {
        let key = self.verifier_key();
        let verifier = self.store.get(&key).await?;
        if verifier.is_some() {
            self.store.remove(&key).await?;
        }
        Ok(verifier.filter(|v| !v.is_empty()))
    }

    /// Record `code` as consumed. Returns false if it already was.
    pub fn mark_code_used(&self, code: &str) -> bool {
        self.used_codes
            .lock()
            .map(|mut used| used.insert(code.to_string()))
            .unwrap_or(false)
    }
}
