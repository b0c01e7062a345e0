//! YAML snapshot files backing the stores.
//!
//! Each store keeps its records in memory and rewrites its whole snapshot after
//! a mutation. Writes go to a temporary sibling file first and are renamed into
//! place, so a crash mid-write leaves the previous snapshot intact.

use crate::error::ModerationResult;
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Snapshot file for one record kind. `None` path means in-memory only.
pub struct YamlFile<T> {
    path: Option<PathBuf>,
    write_lock: Arc<Mutex<()>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for YamlFile<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            write_lock: Arc::clone(&self.write_lock),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for YamlFile<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YamlFile").field("path", &self.path).finish()
    }
}

impl<T: Serialize + DeserializeOwned> YamlFile<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            write_lock: Arc::new(Mutex::new(())),
            _marker: PhantomData,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            write_lock: Arc::new(Mutex::new(())),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the snapshot. A missing file is `Ok(None)`.
    ///
    /// # Errors
    /// Returns a storage error if the file exists but cannot be read or parsed.
    pub async fn load(&self) -> ModerationResult<Option<T>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };

        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_yaml::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the snapshot with the value produced by `snapshot`.
    ///
    /// `snapshot` runs while the write lock is held, so the last write to land
    /// always carries the newest state.
    ///
    /// # Errors
    /// Returns a storage error if serialization or any file operation fails.
    pub async fn save_with(&self, snapshot: impl FnOnce() -> T) -> ModerationResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let yaml = serde_yaml::to_string(&snapshot())?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, yaml).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!(path = %path.display(), "Snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let file: YamlFile<Vec<u64>> = YamlFile::new(dir.path().join("absent.yaml"));
        assert!(file.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_creates_parent_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ids.yaml");
        let file: YamlFile<Vec<u64>> = YamlFile::new(&path);

        file.save_with(|| vec![1, 2, 3]).await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("yaml.tmp").exists());

        let reopened: YamlFile<Vec<u64>> = YamlFile::new(&path);
        assert_eq!(reopened.load().await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        tokio::fs::write(&path, "{ not: [valid").await.unwrap();

        let file: YamlFile<Vec<u64>> = YamlFile::new(&path);
        assert!(matches!(
            file.load().await,
            Err(crate::ModerationError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_is_a_noop() {
        let file: YamlFile<Vec<u64>> = YamlFile::in_memory();
        file.save_with(|| vec![7]).await.unwrap();
        assert!(file.load().await.unwrap().is_none());
        assert!(file.path().is_none());
    }
}
