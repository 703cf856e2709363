//! Run orchestration.
//!
//! One run walks a fixed lifecycle: connect and discover manifests, then
//! per manifest select, expand, validate, resolve schemas, download, and
//! finalize. Any error aborts the run; the batch record for the failed
//! manifest is never committed, so the next run selects it again.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{ListMode, StorageBackend};
use crate::config::{IngestConfig, ProcessMode};
use crate::decrypt::{Decryptor, is_encrypted, plaintext_name};
use crate::download::{DownloadCoordinator, DownloadItem, zip_to_gzip};
use crate::error::IngestError;
use crate::feed::{FeedField, FeedTree, build_fields, columns_from_header, parse_feed_file, read_header};
use crate::manifest::{
    CompiledPattern, FileRow, Manifest, check_entities_against_config, check_referenced_files,
    check_sequence, find_manifest_to_process, group_rows_by_entity, load_file_rows,
    sort_manifests, synthesize_manifest,
};
use crate::metadata::{Batch, CacheDate, Entity, MetadataCache, MetadataStore};
use crate::schema::{apply_diff, diff_fields};

/// Services and configuration one run operates on.
pub struct RunContext {
    /// Validated run configuration.
    pub config: Arc<IngestConfig>,
    /// Remote storage holding manifests and data files.
    pub backend: Arc<dyn StorageBackend>,
    /// Metadata persistence.
    pub store: Arc<dyn MetadataStore>,
    /// Decryptor for `.pgp` payloads.
    pub decryptor: Arc<dyn Decryptor>,
    /// Cross-run entity-version date cache.
    pub cache: MetadataCache,
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Nothing happened yet.
    Init,
    /// Manifests discovered and batch history loaded.
    Connected,
    /// A manifest was chosen and passed the sequence check.
    ManifestSelected,
    /// Entity schemas are diffed, applied, and saved.
    SchemaResolved,
    /// Files are in flight.
    Downloading,
    /// The batch record was committed and post-processing ran.
    Finalized,
    /// The run stopped on an error; nothing was committed for the
    /// in-flight manifest.
    Aborted,
}

/// Counters reported at the end of a successful run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Manifests fully processed and committed.
    pub manifests_processed: usize,
    /// Data files downloaded and stored across all batches.
    pub files_processed: usize,
}

/// Drives one ingestion run over a [`RunContext`].
pub struct Orchestrator {
    context: RunContext,
    state: RunState,
    sequence_mode: bool,
    manifests: Vec<Manifest>,
    synthesized_rows: Vec<FileRow>,
    history: Vec<Batch>,
    previous_batch: Option<Batch>,
    position: usize,
}

impl Orchestrator {
    /// Creates an orchestrator in the initial state.
    #[must_use]
    pub fn new(context: RunContext) -> Self {
        Self {
            context,
            state: RunState::Init,
            sequence_mode: false,
            manifests: Vec::new(),
            synthesized_rows: Vec::new(),
            history: Vec::new(),
            previous_batch: None,
            position: 0,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Executes the run: up to `manifests_per_run` manifests, stopping
    /// early and cleanly when none are pending.
    ///
    /// # Errors
    ///
    /// Propagates the first error of any phase; the orchestrator moves to
    /// [`RunState::Aborted`] and the in-flight batch stays uncommitted.
    pub async fn run(&mut self) -> Result<RunSummary, IngestError> {
        match self.run_inner().await {
            Ok(summary) => Ok(summary),
            Err(error) => {
                self.state = RunState::Aborted;
                Err(error)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<RunSummary, IngestError> {
        self.connect().await?;

        let mut summary = RunSummary::default();
        for _ in 0..self.context.config.manifests_per_run {
            match self.process_next().await? {
                Some(files) => {
                    summary.manifests_processed += 1;
                    summary.files_processed += files;
                }
                None => {
                    debug!("no pending manifest, run complete");
                    break;
                }
            }
        }

        self.context.cache.persist()?;
        info!(
            manifests = summary.manifests_processed,
            files = summary.files_processed,
            "run finished"
        );
        Ok(summary)
    }

    /// Discovers manifests and loads batch history.
    async fn connect(&mut self) -> Result<(), IngestError> {
        let config = Arc::clone(&self.context.config);
        config.validate()?;

        if config.generate_manifests {
            let objects = self
                .context
                .backend
                .list(&config.remote_folder, ListMode::Fast)
                .await?;
            let (manifest, rows) = synthesize_manifest(&objects, Utc::now().naive_utc());
            if !rows.is_empty() {
                self.manifests = vec![manifest];
                self.synthesized_rows = rows;
            }
        } else {
            let pattern =
                CompiledPattern::compile(&config.manifest_pattern, &config.processed_prefix)?;
            self.sequence_mode = pattern.sequence_mode();

            let objects = self
                .context
                .backend
                .list(&config.remote_folder, ListMode::Fast)
                .await?;
            self.manifests = objects
                .iter()
                .filter_map(|o| pattern.match_manifest(&o.key, Some(pattern.regex_source())))
                .collect();
            sort_manifests(&mut self.manifests, self.sequence_mode);
        }

        self.history = self.context.store.load_batches().await?;
        self.previous_batch = self.history.last().cloned();
        self.state = RunState::Connected;
        info!(
            manifests = self.manifests.len(),
            batches = self.history.len(),
            "connected"
        );
        Ok(())
    }

    /// Processes the next pending manifest; `None` when there is none.
    async fn process_next(&mut self) -> Result<Option<usize>, IngestError> {
        let config = Arc::clone(&self.context.config);

        let Some(manifest) = find_manifest_to_process(
            &self.manifests,
            config.process_mode,
            &self.history,
            self.position,
        )
        .cloned() else {
            return Ok(None);
        };

        if self.sequence_mode && !manifest.synthesized {
            check_sequence(&manifest, self.previous_batch.as_ref())?;
        }
        self.state = RunState::ManifestSelected;
        info!(manifest = %manifest.path, sequence = ?manifest.sequence, "processing manifest");

        let rows = if manifest.synthesized {
            std::mem::take(&mut self.synthesized_rows)
        } else {
            let local = self.fetch_to_scratch(&manifest.path).await?;
            let rows = load_file_rows(&local, config.manifest_separator, &manifest);
            let _ = std::fs::remove_file(&local);
            rows?
        };
        let grouped = group_rows_by_entity(rows)?;

        if !manifest.synthesized {
            let configured = if config.entities.is_empty() {
                self.context.store.downloader_entity_ids().await?
            } else {
                config.entities.clone()
            };
            let flat: Vec<FileRow> = grouped.values().flatten().cloned().collect();
            check_entities_against_config(&flat, &configured)?;
            check_referenced_files(&flat, self.context.backend.as_ref()).await?;
        }

        let feed_tree = match &config.feed_file {
            Some(remote) => {
                let local = self.fetch_to_scratch(remote).await?;
                let tree = parse_feed_file(&local);
                let _ = std::fs::remove_file(&local);
                Some(tree?)
            }
            None => None,
        };

        // Schema resolution per entity group.
        let mut items = Vec::new();
        for (entity_id, rows) in grouped {
            let (entity, date) = self
                .resolve_entity(&entity_id, &rows, feed_tree.as_ref(), &manifest)
                .await?;
            let entity = Arc::new(Mutex::new(entity));
            for row in rows {
                items.push(DownloadItem {
                    entity: Arc::clone(&entity),
                    row,
                    date,
                });
            }
        }
        self.state = RunState::SchemaResolved;

        let mut batch = Batch::new(&config.downloader_id);
        batch.sequence = manifest.sequence;
        batch.filename = manifest.filename().to_string();
        // The storage name is fixed up front so runtime metadata can
        // point at the batch record.
        let stored_as = batch.storage_filename(Utc::now().timestamp());
        let batch = Arc::new(Mutex::new(batch));

        self.state = RunState::Downloading;
        let coordinator = DownloadCoordinator::new(
            Arc::clone(&config),
            Arc::clone(&self.context.backend),
            Arc::clone(&self.context.store),
            Arc::clone(&self.context.decryptor),
        );
        let files = coordinator
            .process(items, &manifest, Arc::clone(&batch), &stored_as)
            .await?;

        let batch = batch.lock().await.clone();
        self.context.store.save_batch(&batch, &stored_as).await?;
        self.post_process(&manifest, &batch).await?;

        self.previous_batch = Some(batch.clone());
        self.history.push(batch);
        self.position += 1;
        self.state = RunState::Finalized;
        Ok(Some(files))
    }

    /// Loads or creates the entity for one manifest group, applies the
    /// schema diff, and refreshes the entity's cache entry with today's
    /// date. Returns the entity together with the date its files are
    /// stored under: the manifest date, or, for synthesized manifests
    /// (which carry no date of their own), the cached last-known date.
    async fn resolve_entity(
        &mut self,
        entity_id: &str,
        rows: &[FileRow],
        feed_tree: Option<&FeedTree>,
        manifest: &Manifest,
    ) -> Result<(Entity, NaiveDate), IngestError> {
        let version = rows
            .first()
            .map_or_else(|| "default".to_string(), |r| r.version.clone());

        let cached = self.context.cache.get(entity_id, &version)?;
        let newly_introduced = cached.is_none();
        let storage_date = if manifest.synthesized {
            cached
                .and_then(CacheDate::to_date)
                .unwrap_or_else(|| Utc::now().date_naive())
        } else {
            manifest.date.date()
        };
        let mut entity = match self.context.store.get_entity(entity_id, &version).await? {
            Some(entity) => entity,
            None => {
                info!(entity = entity_id, version = %version, "creating entity");
                let mut entity = Entity::new(entity_id, &version);
                entity.mark_dirty();
                entity
            }
        };

        let declared = self.declared_fields(entity_id, &version, rows, feed_tree).await?;
        let fields = build_fields(entity_id, &declared)?;
        let diff = diff_fields(&entity, &fields);
        apply_diff(&mut entity, &diff, newly_introduced)?;

        // Parsing hints for downstream loaders.
        entity.set_custom("skip_rows", "1");
        entity.set_custom("column_separator", ",");

        if entity.is_dirty() {
            self.context.store.save_entity(&entity).await?;
            entity.clear_dirty();
        }
        self.context
            .cache
            .set(entity_id, &version, CacheDate::today())?;
        Ok((entity, storage_date))
    }

    /// Field list the feed declares for the entity-version; when no feed
    /// file is configured (or it does not cover the entity), the header of
    /// the group's first data file is sampled instead.
    async fn declared_fields(
        &mut self,
        entity_id: &str,
        version: &str,
        rows: &[FileRow],
        feed_tree: Option<&FeedTree>,
    ) -> Result<Vec<FeedField>, IngestError> {
        if let Some(tree) = feed_tree {
            if let Some(versions) = tree.get(entity_id) {
                if let Some(declared) = versions.get(version).or_else(|| versions.get("default")) {
                    return Ok(declared.clone());
                }
                warn!(
                    entity = entity_id,
                    version, "feed file does not cover this version, sampling header"
                );
            }
        }

        let row = rows.first().ok_or_else(|| {
            IngestError::configuration(format!("no files in manifest for entity {entity_id}"))
        })?;
        let mut local = self.fetch_to_scratch(&row.path).await?;
        if local.extension().is_some_and(|ext| ext == "zip") {
            local = zip_to_gzip(&local)?;
        }
        let header = read_header(&local);
        let _ = std::fs::remove_file(&local);
        let header = header?;
        debug!(entity = entity_id, header = %header, "sampled data header");
        Ok(columns_from_header(&header))
    }

    /// Fetches a remote file into the scratch directory, decrypting `.pgp`
    /// payloads on the way.
    async fn fetch_to_scratch(&self, remote: &str) -> Result<PathBuf, IngestError> {
        let config = &self.context.config;
        std::fs::create_dir_all(&config.local_path)
            .map_err(|e| IngestError::io(&config.local_path, e))?;

        let filename = remote.rsplit('/').next().unwrap_or(remote);
        let local = config.local_path.join(filename);
        self.context.backend.read(remote, &local).await?;

        if !is_encrypted(remote) {
            return Ok(local);
        }
        let key = config.pgp_private_key.as_deref().ok_or_else(|| {
            IngestError::configuration(format!(
                "{remote} is encrypted but no pgp_private_key is configured"
            ))
        })?;
        let cipher = std::fs::read(&local).map_err(|e| IngestError::io(&local, e))?;
        let plain = self
            .context
            .decryptor
            .decrypt(&cipher, key, config.pgp_passphrase.as_deref())?;
        let plain_path = config.local_path.join(plaintext_name(filename));
        std::fs::write(&plain_path, plain).map_err(|e| IngestError::io(&plain_path, e))?;
        std::fs::remove_file(&local).map_err(|e| IngestError::io(&local, e))?;
        Ok(plain_path)
    }

    /// Post-batch cleanup at the backend: data deletion or relocation, and
    /// manifest relocation in move mode.
    async fn post_process(&self, manifest: &Manifest, batch: &Batch) -> Result<(), IngestError> {
        let config = &self.context.config;

        if config.delete_data_after_processing {
            for file in &batch.files {
                self.context.backend.delete(&file.file).await?;
            }
        } else if let Some(prefix) = &config.move_data_after_processing_to {
            for file in &batch.files {
                let filename = file.file.rsplit('/').next().unwrap_or(&file.file);
                self.context
                    .backend
                    .rename(&file.file, &format!("{prefix}/{filename}"))
                    .await?;
            }
        }

        if config.process_mode == ProcessMode::Move && !manifest.synthesized {
            let prefix = config
                .move_manifests_after_processing_to
                .as_deref()
                .unwrap_or(&config.processed_prefix);
            let target = format!("{prefix}/{}", manifest.filename());
            self.context.backend.rename(&manifest.path, &target).await?;
            info!(from = %manifest.path, to = %target, "manifest moved");
        }
        Ok(())
    }
}
