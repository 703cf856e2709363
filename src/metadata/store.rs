//! Metadata persistence seam.
//!
//! The engine only needs a handful of store operations; everything else
//! about the metadata service stays outside this crate. The in-tree
//! [`JsonMetadataStore`] persists the documented JSON formats to a local
//! directory and backs the integration tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use super::{Batch, Entity};
use crate::error::IngestError;

/// Persistence operations required by the ingestion engine.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Loads an entity by id and version; `None` when the entity has never
    /// been saved.
    async fn get_entity(&self, id: &str, version: &str) -> Result<Option<Entity>, IngestError>;

    /// Persists an entity record.
    async fn save_entity(&self, entity: &Entity) -> Result<(), IngestError>;

    /// Persists a batch record under the given storage filename. The name
    /// is fixed before the downloads start so runtime metadata can refer
    /// to it.
    async fn save_batch(&self, batch: &Batch, filename: &str) -> Result<(), IngestError>;

    /// Loads all previously committed batches, oldest first.
    async fn load_batches(&self) -> Result<Vec<Batch>, IngestError>;

    /// Stores a downloaded data file under the entity's dated prefix;
    /// returns the stored path.
    async fn save_data(
        &self,
        entity: &Entity,
        local: &Path,
        stored_name: &str,
        date: NaiveDate,
    ) -> Result<String, IngestError>;

    /// Entity ids this downloader is configured to ingest.
    async fn downloader_entity_ids(&self) -> Result<Vec<String>, IngestError>;
}

/// Directory-backed metadata store persisting the documented JSON formats.
#[derive(Debug, Clone)]
pub struct JsonMetadataStore {
    root: PathBuf,
    downloader_id: String,
    entity_ids: Vec<String>,
}

impl JsonMetadataStore {
    /// Creates a store rooted at `root` for the given downloader and its
    /// configured entity ids.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] if the root cannot be created.
    pub fn new(
        root: impl Into<PathBuf>,
        downloader_id: impl Into<String>,
        entity_ids: Vec<String>,
    ) -> Result<Self, IngestError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| IngestError::io(&root, e))?;
        Ok(Self {
            root,
            downloader_id: downloader_id.into(),
            entity_ids,
        })
    }

    fn entity_path(&self, id: &str, version: &str) -> PathBuf {
        self.root.join("entities").join(format!("{id}-{version}.json"))
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> Result<(), IngestError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).map_err(|e| IngestError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| IngestError::io(path, e))
    }
}

#[async_trait]
impl MetadataStore for JsonMetadataStore {
    async fn get_entity(&self, id: &str, version: &str) -> Result<Option<Entity>, IngestError> {
        let path = self.entity_path(id, version);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| IngestError::io(&path, e))?;
        let entity = serde_json::from_str(&raw).map_err(|e| {
            IngestError::configuration(format!("corrupt entity record {}: {e}", path.display()))
        })?;
        Ok(Some(entity))
    }

    async fn save_entity(&self, entity: &Entity) -> Result<(), IngestError> {
        let path = self.entity_path(&entity.id, &entity.version);
        let json = serde_json::to_string_pretty(entity)
            .map_err(|e| IngestError::configuration(format!("unserializable entity: {e}")))?;
        self.write_atomic(&path, &json)?;
        debug!(entity = %entity.id, version = %entity.version, "saved entity");
        Ok(())
    }

    async fn save_batch(&self, batch: &Batch, filename: &str) -> Result<(), IngestError> {
        let path = self.root.join("batches").join(filename);
        let json = batch
            .to_json()
            .map_err(|e| IngestError::configuration(format!("unserializable batch: {e}")))?;
        self.write_atomic(&path, &json)?;
        debug!(filename, files = batch.files.len(), "saved batch");
        Ok(())
    }

    async fn load_batches(&self) -> Result<Vec<Batch>, IngestError> {
        let dir = self.root.join("batches");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| IngestError::io(&dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        names.sort();

        let mut batches = Vec::with_capacity(names.len());
        for path in names {
            let raw = std::fs::read_to_string(&path).map_err(|e| IngestError::io(&path, e))?;
            let batch = serde_json::from_str(&raw).map_err(|e| {
                IngestError::configuration(format!("corrupt batch record {}: {e}", path.display()))
            })?;
            batches.push(batch);
        }
        Ok(batches)
    }

    async fn save_data(
        &self,
        entity: &Entity,
        local: &Path,
        stored_name: &str,
        date: NaiveDate,
    ) -> Result<String, IngestError> {
        use chrono::Datelike;

        let relative = format!(
            "{}/{}/{:04}/{:02}/{:02}/{stored_name}",
            self.downloader_id,
            entity.id,
            date.year(),
            date.month(),
            date.day()
        );
        let target = self.root.join("data").join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
        }
        std::fs::copy(local, &target).map_err(|e| IngestError::io(&target, e))?;
        debug!(entity = %entity.id, path = %relative, "stored data file");
        Ok(relative)
    }

    async fn downloader_entity_ids(&self) -> Result<Vec<String>, IngestError> {
        Ok(self.entity_ids.clone())
    }
}
