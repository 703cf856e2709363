//! Filesystem-backed [`StorageBackend`] implementation.
//!
//! Keys map to paths relative to a root directory. The etag reported by
//! [`object`](StorageBackend::object) is the MD5 of the file contents,
//! matching what object stores report for single-part uploads.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ListMode, RemoteObject, StorageBackend};
use crate::error::IngestError;

/// Storage backend rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Creates a backend rooted at `root`. The directory is created if it
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] if the root cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, IngestError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| IngestError::io(&root, e))?;
        Ok(Self { root })
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn walk(&self, dir: &Path, keys: &mut Vec<String>) -> Result<(), IngestError> {
        let entries = std::fs::read_dir(dir).map_err(|e| IngestError::io(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| IngestError::io(dir, e))?;
            let path = entry.path();
            if path.is_dir() {
                self.walk(&path, keys)?;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                keys.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn list(&self, prefix: &str, mode: ListMode) -> Result<Vec<RemoteObject>, IngestError> {
        let dir = self.resolve(prefix);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        if dir.is_dir() {
            self.walk(&dir, &mut keys)?;
        } else if let Ok(relative) = dir.strip_prefix(&self.root) {
            // A prefix naming a single file lists just that file.
            keys.push(relative.to_string_lossy().replace('\\', "/"));
        }
        keys.sort();
        debug!(prefix, count = keys.len(), "listed local objects");

        let mut objects = Vec::with_capacity(keys.len());
        for key in keys {
            let object = match mode {
                ListMode::Fast => RemoteObject::new(key),
                ListMode::Full => self.object(&key).await?,
            };
            objects.push(object);
        }
        Ok(objects)
    }

    async fn read(&self, remote: &str, local: &Path) -> Result<(), IngestError> {
        let source = self.resolve(remote);
        if !source.is_file() {
            return Err(IngestError::not_found(remote));
        }
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
        }
        std::fs::copy(&source, local).map_err(|e| IngestError::io(local, e))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, IngestError> {
        Ok(self.resolve(path).exists())
    }

    async fn delete(&self, path: &str) -> Result<(), IngestError> {
        let target = self.resolve(path);
        std::fs::remove_file(&target).map_err(|e| IngestError::io(&target, e))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), IngestError> {
        let source = self.resolve(from);
        let target = self.resolve(to);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
        }
        std::fs::rename(&source, &target).map_err(|e| IngestError::io(&source, e))
    }

    async fn object(&self, path: &str) -> Result<RemoteObject, IngestError> {
        let target = self.resolve(path);
        if !target.is_file() {
            return Err(IngestError::not_found(path));
        }
        let bytes = std::fs::read(&target).map_err(|e| IngestError::io(&target, e))?;
        Ok(RemoteObject {
            key: path.to_string(),
            etag: Some(format!("{:x}", md5::compute(&bytes))),
        })
    }
}
