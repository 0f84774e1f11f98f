use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Final resting place of accepted uploads
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Copy `source` to `key`, returning the absolute location written
    async fn store_from(&self, key: &str, source: &Path) -> Result<PathBuf>;

    /// Remove `key`; a missing object is not an error
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Storage key of an accepted upload: `{workspace_id}/{stored_name}`
pub fn storage_key(workspace_id: i64, stored_name: &str) -> String {
    format!("{}/{}", workspace_id, stored_name)
}

/// Stores files below a base directory on the local filesystem
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn store_from(&self, key: &str, source: &Path) -> Result<PathBuf> {
        let full_path = self.full_path(key);
        debug!("Storing {} at {}", source.display(), full_path.display());

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!("create_dir_all({}) failed: {}", parent.display(), e);
                e
            })?;
        }

        // Copy next to the target, then rename into place
        let temp_path = full_path.with_extension("part");
        if let Err(e) = fs::copy(source, &temp_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            warn!(
                "rename({} -> {}) failed: {}",
                temp_path.display(),
                full_path.display(),
                e
            );
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(full_path)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.full_path(key);
        if fs::try_exists(&full_path).await? {
            fs::remove_file(full_path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("staged.bin");
        std::fs::write(&source, b"payload").unwrap();

        let storage = LocalStorage::new(dir.path().join("uploads"));
        let key = storage_key(42, "abc.txt");
        let written = storage.store_from(&key, &source).await.unwrap();

        assert_eq!(written, dir.path().join("uploads/42/abc.txt"));
        assert_eq!(std::fs::read(&written).unwrap(), b"payload");
        assert!(!storage.full_path("42/abc.part").exists());

        storage.delete(&key).await.unwrap();
        assert!(!written.exists());
        // Deleting twice is fine
        storage.delete(&key).await.unwrap();
    }
}
