//! Run configuration: what to ingest, from where, and how.
//!
//! Configuration is a JSON document loaded once at run start and threaded
//! through the [`RunContext`](crate::run::RunContext); there are no
//! process-wide settings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Default number of concurrent download workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Minimum allowed worker count.
const MIN_WORKERS: usize = 1;

/// Maximum allowed worker count.
const MAX_WORKERS: usize = 100;

/// How processed manifests are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    /// Manifests are physically relocated under the processed prefix after
    /// a successful batch.
    #[default]
    Move,
    /// Manifests stay in place; batch history records which were ingested.
    History,
}

/// Configuration for one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Identifier written into every batch record.
    pub downloader_id: String,

    /// Remote prefix under which manifests and data files live.
    pub remote_folder: String,

    /// Manifest filename pattern with `{time(FORMAT)}` and optional
    /// `{sequence}` placeholders.
    pub manifest_pattern: String,

    /// Entity ids this downloader ingests; manifests must cover exactly
    /// this set.
    #[serde(default)]
    pub entities: Vec<String>,

    /// Manifest post-processing mode.
    #[serde(default)]
    pub process_mode: ProcessMode,

    /// Synthesize manifests from the data folder instead of expecting
    /// externally supplied ones.
    #[serde(default)]
    pub generate_manifests: bool,

    /// Write link documents at the source instead of copying payloads.
    #[serde(default)]
    pub use_link_file: bool,

    /// Skip checksum verification even when the manifest records one.
    #[serde(default)]
    pub ignore_checksum: bool,

    /// Skip header column-count validation against the entity schema.
    #[serde(default = "default_true")]
    pub ignore_columns_check: bool,

    /// Compare the remote object's ETag instead of hashing the local copy.
    #[serde(default)]
    pub remote_checksum: bool,

    /// Number of concurrent download workers (1-100).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How many manifests a single run may process.
    #[serde(default = "default_one")]
    pub manifests_per_run: usize,

    /// Remote path of the feed definition file, when one exists. Without
    /// it, schemas are derived from sampled data file headers.
    #[serde(default)]
    pub feed_file: Option<String>,

    /// Delete remote data files once the batch is committed.
    #[serde(default)]
    pub delete_data_after_processing: bool,

    /// Move remote data files to this prefix once the batch is committed.
    #[serde(default)]
    pub move_data_after_processing_to: Option<String>,

    /// Move the manifest to this prefix instead of the default processed
    /// location.
    #[serde(default)]
    pub move_manifests_after_processing_to: Option<String>,

    /// Directory segment that marks a key as already processed.
    #[serde(default = "default_processed_prefix")]
    pub processed_prefix: String,

    /// Local scratch directory for in-flight downloads.
    #[serde(default = "default_local_path")]
    pub local_path: PathBuf,

    /// Column separator used by manifest files.
    #[serde(default = "default_separator")]
    pub manifest_separator: char,

    /// PGP private key for `.pgp` payloads, when the feed is encrypted.
    #[serde(default)]
    pub pgp_private_key: Option<String>,

    /// Passphrase for `pgp_private_key`.
    #[serde(default)]
    pub pgp_passphrase: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_one() -> usize {
    1
}

fn default_processed_prefix() -> String {
    "processed".to_string()
}

fn default_local_path() -> PathBuf {
    PathBuf::from("source")
}

fn default_separator() -> char {
    '|'
}

impl IngestConfig {
    /// Loads and validates configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] if the file cannot be read and
    /// [`IngestError::Configuration`] if it does not parse or fails
    /// [`validate`](Self::validate).
    pub fn load(path: &Path) -> Result<Self, IngestError> {
        let raw = std::fs::read_to_string(path).map_err(|e| IngestError::io(path, e))?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            IngestError::configuration(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates option combinations that cannot be expressed in types.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Configuration`] when history mode is combined
    /// with generated manifests (there is no retained file to record in
    /// history) or the worker count is out of range.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.process_mode == ProcessMode::History && self.generate_manifests {
            return Err(IngestError::configuration(
                "generate_manifests cannot be combined with history mode",
            ));
        }
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.workers) {
            return Err(IngestError::configuration(format!(
                "workers must be between {MIN_WORKERS} and {MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        if self.manifests_per_run == 0 {
            return Err(IngestError::configuration(
                "manifests_per_run must be at least 1",
            ));
        }
        Ok(())
    }
}
