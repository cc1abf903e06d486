//! Byte storage for EML artifacts and attachment sources.
//!
//! Paths are relative, forward-slash separated keys. The filesystem
//! backend maps them under a root directory and refuses anything that
//! would escape it.

use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{Result, StoreError};

/// Byte storage behind the archiver and the attachment resolver.
#[async_trait]
pub trait ObjectStore: Send + Sync + Debug {
    /// Write `bytes` at `path`, replacing any existing object.
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read the object at `path`.
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Whether an object exists at `path`.
    async fn exists(&self, path: &str) -> bool;

    /// Remove the object at `path`. Removing a missing object is not an
    /// error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Size in bytes of the object at `path`.
    async fn size(&self, path: &str) -> Result<u64>;
}

/// Filesystem-backed object store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key against the root, rejecting absolute paths and any
    /// parent-directory components.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        if rel.components().any(|c| {
            !matches!(c, Component::Normal(_)) || matches!(c, Component::Normal(s) if s.is_empty())
        }) {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        if path.is_empty() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&target, bytes).await?;

        tracing::trace!(path, size = bytes.len(), "stored object");

        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;

        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ObjectNotFound(path.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, path: &str) -> bool {
        let Ok(target) = self.resolve(path) else {
            return false;
        };

        tokio::fs::try_exists(&target).await.unwrap_or(false)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;

        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn size(&self, path: &str) -> Result<u64> {
        let target = self.resolve(path)?;

        match tokio::fs::metadata(&target).await {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ObjectNotFound(path.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory object store used in tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.objects.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.objects
            .get(path)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::ObjectNotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> bool {
        self.objects.contains_key(path)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.remove(path);
        Ok(())
    }

    async fn size(&self, path: &str) -> Result<u64> {
        self.objects
            .get(path)
            .map(|entry| entry.value().len() as u64)
            .ok_or_else(|| StoreError::ObjectNotFound(path.to_string()))
    }
}
