//! Object storage adapter.
//!
//! The upload-confirmation flow (outside this core) chooses opaque keys;
//! the pipeline only needs existence checks, byte fetches, and a
//! best-effort delete. The production implementation is filesystem-backed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::StorageError;

/// Narrow contract over the object store backing receipt uploads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns whether the object exists.
    async fn head(&self, key: &str) -> Result<bool, StorageError>;

    /// Fetches the raw bytes of the object.
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Deletes the object. Missing objects are not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Filesystem-backed object store rooted at a single directory.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a key to a path under the root, rejecting absolute keys
    /// and traversal components.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || Path::new(key).is_absolute() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        if key.split(['/', '\\']).any(|part| part == "..") {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn head(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await.map_err(|e| StorageError::Io {
            key: key.to_string(),
            source: e,
        })?)
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::Io {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io {
                key: key.to_string(),
                source: e,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FsObjectStore) {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_head_fetch_delete_roundtrip() {
        let (dir, store) = store();
        let subdir = dir.path().join("receipts");
        std::fs::create_dir_all(&subdir).unwrap();
        std::fs::write(subdir.join("r1.pdf"), b"pdf bytes").unwrap();

        assert!(store.head("receipts/r1.pdf").await.unwrap());
        assert_eq!(store.fetch("receipts/r1.pdf").await.unwrap(), b"pdf bytes");

        store.delete("receipts/r1.pdf").await.unwrap();
        assert!(!store.head("receipts/r1.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store.fetch("nope.pdf").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let (_dir, store) = store();
        store.delete("nope.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn test_traversal_key_rejected() {
        let (_dir, store) = store();
        for key in ["../escape", "a/../../b", "/etc/passwd", ""] {
            let err = store.head(key).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)), "key: {key}");
        }
    }
}
