//! Cross-checks between a manifest, the downloader configuration, and
//! backend state. Skipped entirely for synthesized manifests, which are
//! derived from backend listings in the first place.

use std::collections::BTreeSet;

use tracing::debug;

use super::FileRow;
use crate::backend::StorageBackend;
use crate::error::IngestError;

/// Verifies the manifest names exactly the configured entity set.
///
/// # Errors
///
/// Returns [`IngestError::Configuration`] listing the entities only the
/// manifest has and the entities only the configuration has.
pub fn check_entities_against_config(
    rows: &[FileRow],
    configured_ids: &[String],
) -> Result<(), IngestError> {
    let manifest_ids: BTreeSet<&str> = rows.iter().map(|r| r.entity.as_str()).collect();
    let configured: BTreeSet<&str> = configured_ids.iter().map(String::as_str).collect();

    let extra: Vec<&str> = manifest_ids.difference(&configured).copied().collect();
    let missing: Vec<&str> = configured.difference(&manifest_ids).copied().collect();

    if extra.is_empty() && missing.is_empty() {
        debug!(entities = manifest_ids.len(), "manifest covers configured entity set");
        return Ok(());
    }
    Err(IngestError::configuration(format!(
        "manifest entity set does not match configuration: only in manifest [{}], only in configuration [{}]",
        extra.join(", "),
        missing.join(", ")
    )))
}

/// Verifies every file referenced by the manifest exists at the backend.
///
/// # Errors
///
/// Returns [`IngestError::NotFound`] for the first missing file.
pub async fn check_referenced_files(
    rows: &[FileRow],
    backend: &dyn StorageBackend,
) -> Result<(), IngestError> {
    for row in rows {
        if !backend.exists(&row.path).await? {
            return Err(IngestError::not_found(&row.path));
        }
    }
    debug!(files = rows.len(), "all referenced files exist");
    Ok(())
}
