//! Storage backend abstraction for remote manifest and data access.
//!
//! The orchestrator never talks to a concrete storage service; it holds a
//! `dyn StorageBackend` exposing the six operations the engine needs:
//! list, read, exists, delete, rename, and object metadata. Concrete
//! adapters (S3, SFTP, WebDAV) live outside this crate; [`LocalBackend`]
//! is the in-tree filesystem implementation used by tests and local runs.

mod local;

pub use local::LocalBackend;

use std::path::Path;

use async_trait::async_trait;

use crate::error::IngestError;

/// How much metadata a listing should carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    /// Keys only; cheapest call, used for manifest discovery sweeps.
    Fast,
    /// Keys with object metadata (etag, size).
    Full,
}

/// A remote object reference returned by listings and metadata lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Backend key, relative to the backend root.
    pub key: String,
    /// Entity tag (content hash for most backends), when known.
    pub etag: Option<String>,
}

impl RemoteObject {
    /// Creates an object reference with no metadata.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            etag: None,
        }
    }

    /// Returns the filename segment of the key.
    #[must_use]
    pub fn filename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Capability interface over a remote storage service.
///
/// All operations are fallible and fatal to the run on error; the engine
/// performs no transport-level retries.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Lists objects under `prefix`.
    async fn list(&self, prefix: &str, mode: ListMode) -> Result<Vec<RemoteObject>, IngestError>;

    /// Transfers a remote object to a local file path.
    async fn read(&self, remote: &str, local: &Path) -> Result<(), IngestError>;

    /// Returns true when the key exists.
    async fn exists(&self, path: &str) -> Result<bool, IngestError>;

    /// Deletes the key.
    async fn delete(&self, path: &str) -> Result<(), IngestError>;

    /// Renames (moves) a key, creating intermediate prefixes as needed.
    async fn rename(&self, from: &str, to: &str) -> Result<(), IngestError>;

    /// Returns object metadata, including the etag when the backend has one.
    async fn object(&self, path: &str) -> Result<RemoteObject, IngestError>;
}
