//! In-memory profile store for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::auth::types::{ProfileUpdate, UserProfile};
use crate::traits::{ProfileStore, ProfileStoreError};

/// In-memory profile store. Clones share the same rows.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProfileStore {
    profiles: Arc<Mutex<HashMap<String, UserProfile>>>,
    /// Error returned by every fetch, if set
    fetch_error: Arc<Mutex<Option<ProfileStoreError>>>,
    /// Error returned by every update/upsert, if set
    write_error: Arc<Mutex<Option<ProfileStoreError>>>,
    /// Error returned by ping, if set
    ping_error: Arc<Mutex<Option<ProfileStoreError>>>,
    fetch_calls: Arc<Mutex<usize>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a profile synchronously (for test setup).
    pub fn insert(&self, profile: UserProfile) {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.id.clone(), profile);
    }

    pub fn profile(&self, user_id: &str) -> Option<UserProfile> {
        self.profiles.lock().unwrap().get(user_id).cloned()
    }

    pub fn set_fetch_error(&self, error: Option<ProfileStoreError>) {
        *self.fetch_error.lock().unwrap() = error;
    }

    pub fn set_write_error(&self, error: Option<ProfileStoreError>) {
        *self.write_error.lock().unwrap() = error;
    }

    pub fn set_ping_error(&self, error: Option<ProfileStoreError>) {
        *self.ping_error.lock().unwrap() = error;
    }

    pub fn fetch_calls(&self) -> usize {
        *self.fetch_calls.lock().unwrap()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn fetch(
        &self,
        user_id: &str,
        _access_token: &str,
    ) -> Result<Option<UserProfile>, ProfileStoreError> {
        *self.fetch_calls.lock().unwrap() += 1;
        if let Some(err) = self.fetch_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.profile(user_id))
    }

    async fn upsert(
        &self,
        profile: &UserProfile,
        _access_token: &str,
    ) -> Result<UserProfile, ProfileStoreError> {
        if let Some(err) = self.write_error.lock().unwrap().clone() {
            return Err(err);
        }
        let mut stored = profile.clone();
        stored.updated_at = Some(Utc::now());
        self.insert(stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        user_id: &str,
        changes: &ProfileUpdate,
        _access_token: &str,
    ) -> Result<UserProfile, ProfileStoreError> {
        if let Some(err) = self.write_error.lock().unwrap().clone() {
            return Err(err);
        }
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .get_mut(user_id)
            .ok_or_else(|| ProfileStoreError::new("profile not found", Some(404)))?;
        profile.apply(changes);
        Ok(profile.clone())
    }

    async fn ping(&self) -> Result<(), ProfileStoreError> {
        match self.ping_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
