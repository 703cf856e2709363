//! Post-transfer verification of downloaded files.

use std::path::Path;

use tracing::debug;

use crate::backend::StorageBackend;
use crate::error::IngestError;
use crate::feed::read_header;
use crate::metadata::Entity;

/// MD5 digest of a local file, lowercase hex.
///
/// # Errors
///
/// Returns [`IngestError::Io`] when the file cannot be read.
pub fn local_md5(path: &Path) -> Result<String, IngestError> {
    let bytes = std::fs::read(path).map_err(|e| IngestError::io(path, e))?;
    Ok(format!("{:x}", md5::compute(&bytes)))
}

/// Verifies a downloaded file against the checksum recorded in the
/// manifest. With `use_remote` the backend's etag is compared instead of
/// hashing the local copy; etags arrive quoted from most backends and the
/// quotes are stripped before comparison.
///
/// # Errors
///
/// Returns [`IngestError::Integrity`] on mismatch or when the backend has
/// no etag to offer in remote mode.
pub async fn check_checksum(
    remote: &str,
    local: &Path,
    expected: &str,
    use_remote: bool,
    backend: &dyn StorageBackend,
) -> Result<(), IngestError> {
    let actual = if use_remote {
        backend
            .object(remote)
            .await?
            .etag
            .map(|etag| etag.trim_matches('"').to_string())
            .ok_or_else(|| IngestError::integrity(remote, expected, "no etag available"))?
    } else {
        local_md5(local)?
    };
    if actual != expected {
        return Err(IngestError::integrity(remote, expected, actual));
    }
    debug!(path = remote, "checksum verified");
    Ok(())
}

/// Verifies the data header column count matches the number of enabled
/// fields in the entity schema.
///
/// # Errors
///
/// Returns [`IngestError::Schema`] on mismatch; a shifted column count
/// means the schema diff missed something and continuing would load
/// misaligned data.
pub fn check_columns(entity: &Entity, local: &Path) -> Result<(), IngestError> {
    let header = read_header(local)?;
    let found = header.split(',').count();
    let expected = entity.enabled_field_count();
    if found != expected {
        return Err(IngestError::schema(
            &entity.id,
            format!(
                "data file {} has {found} columns, schema has {expected} enabled fields",
                local.display()
            ),
        ));
    }
    debug!(entity = %entity.id, columns = found, "column count verified");
    Ok(())
}
