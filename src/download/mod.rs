//! Bounded-concurrency download of one manifest's worth of data files.
//!
//! Each file goes through fetch, optional decrypt, zip normalization,
//! integrity checks, storage under the entity's dated prefix, runtime
//! metadata attachment, and a batch record entry. Files fan out across a
//! semaphore-bounded worker pool; the first failure aborts the run after
//! all in-flight tasks settle.

mod archive;
mod integrity;

pub use archive::zip_to_gzip;
pub use integrity::{check_checksum, check_columns, local_md5};

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info};

use crate::backend::StorageBackend;
use crate::config::IngestConfig;
use crate::decrypt::{Decryptor, is_encrypted, plaintext_name};
use crate::error::IngestError;
use crate::feed::count_rows;
use crate::manifest::{ExportType, FileRow, Manifest};
use crate::metadata::{Batch, Entity, MetadataStore};

/// One data file to download, together with the entity it updates.
pub struct DownloadItem {
    /// Entity record the file belongs to; shared across all of the
    /// entity's files in this batch.
    pub entity: Arc<Mutex<Entity>>,
    /// The manifest row describing the file.
    pub row: FileRow,
    /// Date the stored copy is filed under; the manifest date, or the
    /// cached last-known date when the manifest carries none.
    pub date: NaiveDate,
}

/// Fans a manifest's files out across a bounded worker pool.
pub struct DownloadCoordinator {
    config: Arc<IngestConfig>,
    backend: Arc<dyn StorageBackend>,
    store: Arc<dyn MetadataStore>,
    decryptor: Arc<dyn Decryptor>,
}

impl DownloadCoordinator {
    /// Creates a coordinator over the run's shared services.
    #[must_use]
    pub fn new(
        config: Arc<IngestConfig>,
        backend: Arc<dyn StorageBackend>,
        store: Arc<dyn MetadataStore>,
        decryptor: Arc<dyn Decryptor>,
    ) -> Self {
        Self {
            config,
            backend,
            store,
            decryptor,
        }
    }

    /// Downloads and commits every item, at most `workers` at a time.
    /// Returns the number of processed files.
    ///
    /// # Errors
    ///
    /// Propagates the first per-file error after all spawned tasks have
    /// settled; no partial results are rolled back, the batch record is
    /// simply never committed.
    pub async fn process(
        &self,
        items: Vec<DownloadItem>,
        manifest: &Manifest,
        batch: Arc<Mutex<Batch>>,
        batch_filename: &str,
    ) -> Result<usize, IngestError> {
        std::fs::create_dir_all(&self.config.local_path)
            .map_err(|e| IngestError::io(&self.config.local_path, e))?;

        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let batch_filename: Arc<str> = Arc::from(batch_filename);
        let mut handles = Vec::with_capacity(total);

        for item in items {
            let semaphore = Arc::clone(&semaphore);
            let config = Arc::clone(&self.config);
            let backend = Arc::clone(&self.backend);
            let store = Arc::clone(&self.store);
            let decryptor = Arc::clone(&self.decryptor);
            let batch = Arc::clone(&batch);
            let batch_filename = Arc::clone(&batch_filename);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| IngestError::configuration("download pool closed"))?;
                process_one(config, backend, store, decryptor, batch, batch_filename, item).await
            }));
        }

        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(IngestError::configuration(format!(
                            "download task panicked: {e}"
                        )));
                    }
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => {
                info!(files = total, manifest = %manifest.filename(), "batch download complete");
                Ok(total)
            }
        }
    }
}

fn random_token(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Names a stored data file: `<epoch-micros>_data_<token>.<ext>`.
fn data_filename(now: DateTime<Utc>, ext: &str) -> String {
    format!("{}_data_{}.{ext}", now.timestamp_micros(), random_token(6))
}

async fn process_one(
    config: Arc<IngestConfig>,
    backend: Arc<dyn StorageBackend>,
    store: Arc<dyn MetadataStore>,
    decryptor: Arc<dyn Decryptor>,
    batch: Arc<Mutex<Batch>>,
    batch_filename: Arc<str>,
    item: DownloadItem,
) -> Result<(), IngestError> {
    let DownloadItem { entity, row, date } = item;

    // Per-file scratch directory; basenames are not unique across rows.
    let scratch = config.local_path.join(random_token(10));
    std::fs::create_dir_all(&scratch).map_err(|e| IngestError::io(&scratch, e))?;

    let result = commit_file(
        &config,
        &backend,
        &store,
        &decryptor,
        &batch,
        &batch_filename,
        &entity,
        &row,
        date,
        &scratch,
    )
    .await;

    // Scratch cleanup is best-effort; a failed run leaves its batch
    // uncommitted either way.
    let _ = std::fs::remove_dir_all(&scratch);
    result
}

#[allow(clippy::too_many_arguments)]
async fn commit_file(
    config: &IngestConfig,
    backend: &Arc<dyn StorageBackend>,
    store: &Arc<dyn MetadataStore>,
    decryptor: &Arc<dyn Decryptor>,
    batch: &Mutex<Batch>,
    batch_filename: &str,
    entity: &Mutex<Entity>,
    row: &FileRow,
    date: NaiveDate,
    scratch: &std::path::Path,
) -> Result<(), IngestError> {
    let now = Utc::now();

    let (local, hash, num_rows) = if config.use_link_file {
        // Link mode hands the remote location downstream instead of
        // moving the payload; there is no local copy to verify.
        let document = json!({ "files": [{ "file": row.path }] });
        let local = scratch.join("link.json");
        let contents = serde_json::to_string_pretty(&document)
            .map_err(|e| IngestError::configuration(format!("unserializable link: {e}")))?;
        std::fs::write(&local, contents).map_err(|e| IngestError::io(&local, e))?;
        debug!(path = %row.path, "wrote link document");
        let num_rows = row.number_of_rows.clone().unwrap_or_default();
        (local, row.checksum.clone(), num_rows)
    } else {
        let mut local = scratch.join(row.filename());
        backend.read(&row.path, &local).await?;

        if is_encrypted(&row.path) {
            let key = config.pgp_private_key.as_deref().ok_or_else(|| {
                IngestError::configuration(format!(
                    "{} is encrypted but no pgp_private_key is configured",
                    row.path
                ))
            })?;
            let cipher = std::fs::read(&local).map_err(|e| IngestError::io(&local, e))?;
            let plain = decryptor.decrypt(&cipher, key, config.pgp_passphrase.as_deref())?;
            let plain_path = scratch.join(plaintext_name(row.filename()));
            std::fs::write(&plain_path, plain).map_err(|e| IngestError::io(&plain_path, e))?;
            std::fs::remove_file(&local).map_err(|e| IngestError::io(&local, e))?;
            local = plain_path;
        }

        if local.extension().is_some_and(|ext| ext == "zip") {
            local = zip_to_gzip(&local)?;
        }

        if !config.ignore_checksum && row.has_checksum() {
            check_checksum(
                &row.path,
                &local,
                &row.checksum,
                config.remote_checksum,
                backend.as_ref(),
            )
            .await?;
        }
        if !config.ignore_columns_check {
            let guard = entity.lock().await;
            check_columns(&guard, &local)?;
        }

        let hash = if row.has_checksum() {
            row.checksum.clone()
        } else {
            local_md5(&local)?
        };
        let num_rows = match &row.number_of_rows {
            Some(count) => count.clone(),
            None => count_rows(&local)?.to_string(),
        };
        (local, hash, num_rows)
    };

    let ext = local
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("csv");
    let stored_name = data_filename(now, ext);

    let stored = {
        let guard = entity.lock().await;
        store.save_data(&guard, &local, &stored_name, date).await?
    };

    let entity_name = {
        let mut guard = entity.lock().await;
        attach_runtime(&mut guard, config, row, batch_filename, &stored, &num_rows, &hash, now);
        store.save_entity(&guard).await?;
        guard.clear_dirty();
        guard.id.clone()
    };

    batch.lock().await.add_file(&entity_name, &row.path);
    info!(entity = %entity_name, file = %row.path, stored = %stored, "file committed");
    Ok(())
}

/// Attaches per-file provenance to the entity's runtime metadata.
#[allow(clippy::too_many_arguments)]
fn attach_runtime(
    entity: &mut Entity,
    config: &IngestConfig,
    row: &FileRow,
    batch_filename: &str,
    stored: &str,
    num_rows: &str,
    hash: &str,
    now: DateTime<Utc>,
) {
    entity.set_runtime("downloader_version", json!(env!("CARGO_PKG_VERSION")));
    entity.set_runtime("downloader_id", json!(config.downloader_id));
    entity.set_runtime("start_date", json!(now.to_rfc3339()));
    entity.set_runtime("source_filename", json!(stored));
    entity.set_runtime("metadata_file", json!(stored));
    entity.set_runtime("original_filename", json!(row.path));
    entity.set_runtime("batch", json!(batch_filename));
    entity.set_runtime("manifest_timestamp", json!(row.timestamp));
    entity.set_runtime("manifest_version", json!(row.version));
    entity.set_runtime("num_rows", json!(num_rows));
    entity.set_runtime("md5", json!(hash));
    entity.set_runtime("export_type", json!(row.export_type.as_str()));
    if row.export_type == ExportType::Full {
        entity.set_runtime("full", json!(true));
    }
    if let Some(sequence) = row.sequence {
        entity.set_runtime("sequence", json!(sequence));
    }
    // The commit moment, not the manifest's own date.
    let today = now.date_naive();
    entity.set_runtime(
        "metadata_date",
        json!({
            "year": today.year(),
            "month": today.month(),
            "day": today.day(),
            "timestamp": now.timestamp(),
        }),
    );
    if let Some(predicate) = &row.target_predicate {
        entity.set_runtime("target_predicate", json!(predicate));
    }
    if let Some(sheet) = &row.sheet_path {
        entity.set_runtime("sheet_path", json!(sheet));
    }
    for (key, value) in &row.extra {
        entity.set_runtime(key, json!(value));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::config::tests::test_config;
    use crate::decrypt::NoDecryptor;
    use crate::metadata::{Field, JsonMetadataStore};
    use tempfile::TempDir;

    const BATCH_NAME: &str = "1471421346_1_batch.json";

    fn stored_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 8, 17).unwrap()
    }

    fn manifest() -> Manifest {
        Manifest {
            path: "data/manifest_1471421346.csv".to_string(),
            sequence: None,
            date: chrono::DateTime::from_timestamp(1_471_421_346, 0)
                .unwrap()
                .naive_utc(),
            regex: None,
            synthesized: false,
        }
    }

    fn entity_for(header: &str) -> Arc<Mutex<Entity>> {
        let mut entity = Entity::new("Event", "default");
        for (index, column) in header.split(',').enumerate() {
            entity.add_field(Field::new(column, column, index.to_string(), "string-255"));
        }
        Arc::new(Mutex::new(entity))
    }

    struct Fixture {
        _remote: TempDir,
        _store_dir: TempDir,
        coordinator: DownloadCoordinator,
        batch: Arc<Mutex<Batch>>,
        store_root: std::path::PathBuf,
    }

    fn fixture(mutate: impl FnOnce(&mut IngestConfig)) -> Fixture {
        let remote = TempDir::new().unwrap();
        std::fs::create_dir_all(remote.path().join("data")).unwrap();
        std::fs::write(remote.path().join("data/events.csv"), "ID,Country\n1,CZ\n").unwrap();

        let store_dir = TempDir::new().unwrap();
        let mut config = test_config();
        config.local_path = store_dir.path().join("scratch");
        mutate(&mut config);

        let backend = LocalBackend::new(remote.path()).unwrap();
        let store = JsonMetadataStore::new(
            store_dir.path().join("meta"),
            "csv_downloader_1",
            vec!["Event".to_string()],
        )
        .unwrap();
        let coordinator = DownloadCoordinator::new(
            Arc::new(config),
            Arc::new(backend),
            Arc::new(store),
            Arc::new(NoDecryptor),
        );
        let store_root = store_dir.path().join("meta");
        Fixture {
            _remote: remote,
            _store_dir: store_dir,
            coordinator,
            batch: Arc::new(Mutex::new(Batch::new("csv_downloader_1"))),
            store_root,
        }
    }

    fn row_for(path: &str, checksum: &str) -> FileRow {
        FileRow {
            entity: "Event".to_string(),
            version: "default".to_string(),
            path: path.to_string(),
            timestamp: "1471421346".to_string(),
            checksum: checksum.to_string(),
            ..FileRow::default()
        }
    }

    #[tokio::test]
    async fn test_download_commits_file_and_metadata() {
        let fixture = fixture(|_| {});
        let entity = entity_for("ID,Country");
        let items = vec![DownloadItem {
            entity: Arc::clone(&entity),
            row: row_for("data/events.csv", "unknown"),
            date: stored_date(),
        }];

        let processed = fixture
            .coordinator
            .process(items, &manifest(), Arc::clone(&fixture.batch), BATCH_NAME)
            .await
            .unwrap();
        assert_eq!(processed, 1);

        let batch = fixture.batch.lock().await;
        assert_eq!(batch.files.len(), 1);
        assert_eq!(batch.files[0].entity, "Event");
        assert_eq!(batch.files[0].file, "data/events.csv");

        let guard = entity.lock().await;
        assert_eq!(guard.runtime["downloader_id"], json!("csv_downloader_1"));
        assert_eq!(guard.runtime["original_filename"], json!("data/events.csv"));
        assert_eq!(guard.runtime["num_rows"], json!("1"));

        // The batch key names the batch record on disk, and metadata_date
        // reflects the commit moment rather than the manifest date.
        assert_eq!(guard.runtime["batch"], json!(BATCH_NAME));
        assert_eq!(guard.runtime["metadata_file"], guard.runtime["source_filename"]);
        let today = Utc::now().date_naive();
        assert_eq!(guard.runtime["metadata_date"]["year"], json!(today.year()));
        assert_eq!(guard.runtime["metadata_date"]["month"], json!(today.month()));
        assert_eq!(guard.runtime["metadata_date"]["day"], json!(today.day()));
        assert!(guard.runtime["metadata_date"]["timestamp"].as_i64().unwrap() > 0);

        // Stored under the dated prefix with the generated data filename.
        let day_dir = fixture
            .store_root
            .join("data/csv_downloader_1/Event/2016/08/17");
        let entries: Vec<_> = std::fs::read_dir(&day_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].as_ref().unwrap().file_name();
        let name = name.to_string_lossy();
        assert!(name.contains("_data_"), "{name}");
        assert!(name.ends_with(".csv"), "{name}");
    }

    #[tokio::test]
    async fn test_checksum_mismatch_aborts() {
        let fixture = fixture(|_| {});
        let items = vec![DownloadItem {
            entity: entity_for("ID,Country"),
            row: row_for("data/events.csv", "ffffffffffffffffffffffffffffffff"),
            date: stored_date(),
        }];

        let error = fixture
            .coordinator
            .process(items, &manifest(), Arc::clone(&fixture.batch), BATCH_NAME)
            .await
            .unwrap_err();
        assert!(matches!(error, IngestError::Integrity { .. }));
        assert!(fixture.batch.lock().await.files.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_checksum_skips_verification() {
        let fixture = fixture(|_| {});
        let items = vec![DownloadItem {
            entity: entity_for("ID,Country"),
            row: row_for("data/events.csv", "unknown"),
            date: stored_date(),
        }];
        assert!(
            fixture
                .coordinator
                .process(items, &manifest(), Arc::clone(&fixture.batch), BATCH_NAME)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_column_check_rejects_width_drift() {
        let fixture = fixture(|config| config.ignore_columns_check = false);
        let items = vec![DownloadItem {
            entity: entity_for("ID,Country,City"),
            row: row_for("data/events.csv", "unknown"),
            date: stored_date(),
        }];

        let error = fixture
            .coordinator
            .process(items, &manifest(), Arc::clone(&fixture.batch), BATCH_NAME)
            .await
            .unwrap_err();
        assert!(matches!(error, IngestError::Schema { .. }));
    }

    #[tokio::test]
    async fn test_link_mode_stores_pointer_document() {
        let fixture = fixture(|config| config.use_link_file = true);
        let entity = entity_for("ID,Country");
        let items = vec![DownloadItem {
            entity: Arc::clone(&entity),
            // An impossible checksum must not matter: link mode skips
            // integrity checks entirely.
            row: row_for("data/events.csv", "ffffffffffffffffffffffffffffffff"),
            date: stored_date(),
        }];

        fixture
            .coordinator
            .process(items, &manifest(), Arc::clone(&fixture.batch), BATCH_NAME)
            .await
            .unwrap();

        let day_dir = fixture
            .store_root
            .join("data/csv_downloader_1/Event/2016/08/17");
        let entry = std::fs::read_dir(&day_dir).unwrap().next().unwrap().unwrap();
        assert!(entry.file_name().to_string_lossy().ends_with(".json"));
        let document: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(entry.path()).unwrap()).unwrap();
        assert_eq!(document["files"][0]["file"], json!("data/events.csv"));
    }

    #[tokio::test]
    async fn test_missing_remote_file_fails() {
        let fixture = fixture(|_| {});
        let items = vec![DownloadItem {
            entity: entity_for("ID,Country"),
            row: row_for("data/absent.csv", "unknown"),
            date: stored_date(),
        }];
        let error = fixture
            .coordinator
            .process(items, &manifest(), Arc::clone(&fixture.batch), BATCH_NAME)
            .await
            .unwrap_err();
        assert!(matches!(error, IngestError::NotFound { .. }));
    }
}
