//! File-based key/value storage adapter.
//!
//! Each key is one file under a storage directory (default
//! `~/.civic-auth`). Writes go to a temp file first and are renamed into
//! place, so a reader never observes a partial value.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::traits::{KeyValueStore, StorageError};

/// Default storage directory name under the home directory.
pub const STORAGE_DIR: &str = ".civic-auth";

const ENTRY_EXT: &str = "entry";

/// File-based key/value store.
///
/// # Example
///
/// ```ignore
/// use civic_auth::adapters::FileKeyValueStore;
/// use civic_auth::traits::KeyValueStore;
///
/// let store = FileKeyValueStore::in_home()?;
/// store.set("civic.auth.session", "{...}").await?;
/// ```
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    /// Store entries under `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store entries under `~/.civic-auth`.
    pub fn in_home() -> Result<Self, StorageError> {
        dirs::home_dir()
            .map(|home| Self::new(home.join(STORAGE_DIR)))
            .ok_or_else(|| StorageError::Other("Failed to determine home directory".to_string()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(StorageError::Other(format!("Invalid storage key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.{}", key, ENTRY_EXT)))
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.entry_path(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFailed(format!("{}: {}", path.display(), e))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.entry_path(key)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;

        // Write to temp file, then rename for atomicity
        let temp_path = path.with_extension("tmp");
        let write = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(value.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                    .await?;
            }

            tokio::fs::rename(&temp_path, &path).await
        };

        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StorageError::WriteFailed(format!("{}: {}", path.display(), e)));
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.entry_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::RemoveFailed(format!("{}: {}", path.display(), e))),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
