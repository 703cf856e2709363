//! Batch records: the per-run commit of which remote files were ingested
//! for which entities.

use serde::{Deserialize, Serialize};

/// One ingested file within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFile {
    /// Entity the file belongs to.
    pub entity: String,
    /// Remote path the file was fetched from.
    pub file: String,
}

/// Per-run commit record describing what was ingested.
///
/// Workers append to `files` concurrently; the orchestrator keeps the batch
/// behind a lock for the duration of the download fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Downloader identification, from configuration.
    pub identification: String,
    /// Manifest sequence, when the pattern carries one.
    pub sequence: Option<i64>,
    /// Manifest filename this batch covers, or a synthesized
    /// `manifest-YYYYMMDDhhmmss` name for generated manifests.
    pub filename: String,
    /// Ingested files, one entry per downloaded file.
    pub files: Vec<BatchFile>,
}

impl Batch {
    /// Creates an empty batch for the given downloader.
    #[must_use]
    pub fn new(identification: impl Into<String>) -> Self {
        Self {
            identification: identification.into(),
            sequence: None,
            filename: String::new(),
            files: Vec::new(),
        }
    }

    /// Records an ingested file.
    pub fn add_file(&mut self, entity: impl Into<String>, file: impl Into<String>) {
        self.files.push(BatchFile {
            entity: entity.into(),
            file: file.into(),
        });
    }

    /// Filename this batch is persisted under:
    /// `<epoch>_<sequence>_batch.json`, with an empty sequence slot when
    /// the manifest carries none.
    #[must_use]
    pub fn storage_filename(&self, epoch: i64) -> String {
        match self.sequence {
            Some(sequence) => format!("{epoch}_{sequence}_batch.json"),
            None => format!("{epoch}__batch.json"),
        }
    }

    /// Serializes the batch record with 2-space indentation.
    ///
    /// # Errors
    ///
    /// Returns the underlying serialization error; batch records are plain
    /// data so this only fails on out-of-memory conditions.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
