//! Profile store trait abstraction.
//!
//! Profiles are owned by a data store external to the auth core. The core
//! reads them to build token claims, writes through on explicit updates, and
//! otherwise only caches the last copy it read.

use async_trait::async_trait;

use crate::auth::types::{ProfileUpdate, UserProfile};

/// Profile store errors.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileStoreError {
    pub message: String,
    /// HTTP status, or `None` for transport failures.
    pub status: Option<u16>,
}

impl ProfileStoreError {
    pub fn new(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }
}

impl std::fmt::Display for ProfileStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "Profile store error ({}): {}", status, self.message),
            None => write!(f, "Profile store error: {}", self.message),
        }
    }
}

impl std::error::Error for ProfileStoreError {}

/// Trait for reading and updating user profiles by user id.
///
/// Every call carries the caller's provider access token so row-level
/// security on the store side sees the right principal.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch a profile. `Ok(None)` when the user has no profile row yet.
    async fn fetch(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<Option<UserProfile>, ProfileStoreError>;

    /// Insert or replace a profile.
    async fn upsert(
        &self,
        profile: &UserProfile,
        access_token: &str,
    ) -> Result<UserProfile, ProfileStoreError>;

    /// Apply a partial update and return the stored result.
    async fn update(
        &self,
        user_id: &str,
        changes: &ProfileUpdate,
        access_token: &str,
    ) -> Result<UserProfile, ProfileStoreError>;

    /// Lightweight reachability probe.
    async fn ping(&self) -> Result<(), ProfileStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_store_error_display() {
        assert_eq!(
            ProfileStoreError::new("permission denied for table profiles", Some(403)).to_string(),
            "Profile store error (403): permission denied for table profiles"
        );
        assert_eq!(
            ProfileStoreError::new("connection reset", None).to_string(),
            "Profile store error: connection reset"
        );
    }
}
