//! In-memory key/value store for testing.
//!
//! Stores entries in a shared map, suitable for testing without file
//! system access. Clones share the same map.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::traits::{KeyValueStore, StorageError};

/// In-memory key/value store for testing.
///
/// # Example
///
/// ```ignore
/// use civic_auth::adapters::mock::InMemoryStore;
/// use civic_auth::traits::KeyValueStore;
///
/// let store = InMemoryStore::new();
/// store.set("civic.auth.session", "{}").await?;
/// assert!(store.contains("civic.auth.session"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    /// Stored entries
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    /// Whether set should fail
    set_should_fail: Arc<Mutex<bool>>,
    /// Whether get should fail
    get_should_fail: Arc<Mutex<bool>>,
    /// Whether remove should fail
    remove_should_fail: Arc<Mutex<bool>>,
    /// Number of successful writes
    writes: Arc<Mutex<usize>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure whether set should fail.
    pub fn set_set_should_fail(&self, should_fail: bool) {
        *self.set_should_fail.lock().unwrap() = should_fail;
    }

    /// Configure whether get should fail.
    pub fn set_get_should_fail(&self, should_fail: bool) {
        *self.get_should_fail.lock().unwrap() = should_fail;
    }

    /// Configure whether remove should fail.
    pub fn set_remove_should_fail(&self, should_fail: bool) {
        *self.remove_should_fail.lock().unwrap() = should_fail;
    }

    /// Insert an entry synchronously (for test setup).
    pub fn insert(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    /// Read an entry synchronously (for assertions).
    pub fn value(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful `set` calls so far.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if *self.get_should_fail.lock().unwrap() {
            return Err(StorageError::ReadFailed("Mock read failure".to_string()));
        }
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if *self.set_should_fail.lock().unwrap() {
            return Err(StorageError::WriteFailed("Mock write failure".to_string()));
        }
        self.insert(key, value);
        *self.writes.lock().unwrap() += 1;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        if *self.remove_should_fail.lock().unwrap() {
            return Err(StorageError::RemoveFailed("Mock remove failure".to_string()));
        }
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        if *self.get_should_fail.lock().unwrap() {
            return Err(StorageError::ReadFailed("Mock read failure".to_string()));
        }
        Ok(self.entries.lock().unwrap().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = InMemoryStore::new();
        assert!(store.get("k").await.unwrap().is_none());

        store.set("k", "v1").await.unwrap();
        store.set("k", "v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(store.write_count(), 2);

        store.remove("k").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failure_toggles() {
        let store = InMemoryStore::new();
        store.set_set_should_fail(true);
        assert!(matches!(
            store.set("k", "v").await,
            Err(StorageError::WriteFailed(_))
        ));

        store.set_get_should_fail(true);
        assert!(matches!(store.get("k").await, Err(StorageError::ReadFailed(_))));
        assert!(store.keys().await.is_err());

        store.set_remove_should_fail(true);
        assert!(matches!(
            store.remove("k").await,
            Err(StorageError::RemoveFailed(_))
        ));
    }

    #[test]
    fn test_clones_share_entries() {
        let store = InMemoryStore::new();
        let cloned = store.clone();
        store.insert("a", "1");
        assert_eq!(cloned.value("a").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_isolation() {
        let first = InMemoryStore::new();
        let second = InMemoryStore::new();
        first.set("a", "1").await.unwrap();
        assert!(second.get("a").await.unwrap().is_none());
    }
}
