//! Persisted key/value storage trait abstraction.
//!
//! The auth core persists one small session envelope (plus a transient PKCE
//! verifier) in client-side storage. This trait abstracts that storage so the
//! controller can run against files in production and memory in tests.

use async_trait::async_trait;

/// Storage operation errors.
#[derive(Debug, Clone)]
pub enum StorageError {
    /// Failed to read an entry
    ReadFailed(String),
    /// Failed to write an entry
    WriteFailed(String),
    /// Failed to remove an entry
    RemoveFailed(String),
    /// IO error
    Io(String),
    /// Serialization/deserialization error
    Serialization(String),
    /// Other error
    Other(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::ReadFailed(msg) => write!(f, "Failed to read storage entry: {}", msg),
            StorageError::WriteFailed(msg) => write!(f, "Failed to write storage entry: {}", msg),
            StorageError::RemoveFailed(msg) => {
                write!(f, "Failed to remove storage entry: {}", msg)
            }
            StorageError::Io(msg) => write!(f, "IO error: {}", msg),
            StorageError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            StorageError::Other(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

/// Trait for persisted client-side key/value storage.
///
/// Values are opaque strings; callers own their encoding. Implementations
/// must make a single `set` atomic from a reader's point of view: a reader
/// sees either the previous value or the new one, never a partial write.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// # Returns
    /// - `Ok(Some(value))` if the key exists
    /// - `Ok(None)` if it does not
    /// - `Err(error)` if reading failed
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a value. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// List all keys currently stored.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}
