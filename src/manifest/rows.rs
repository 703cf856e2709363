//! Expansion of a manifest file into [`FileRow`]s.
//!
//! Manifests are separator-delimited CSV files with a header row. Columns
//! beyond the well-known set are preserved verbatim in `extra` and flow
//! into runtime metadata untouched.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use tracing::debug;

use super::{ExportType, FileRow, Manifest};
use crate::error::IngestError;

const WELL_KNOWN_COLUMNS: [&str; 10] = [
    "feed",
    "file_url",
    "timestamp",
    "feed_version",
    "num_rows",
    "md5",
    "export_type",
    "entity_regex",
    "target_predicate",
    "sheet_path",
];

/// Schema version used when a manifest row declares none.
pub const DEFAULT_VERSION: &str = "default";

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Applies a row-level `entity_regex` override to the filename of the
/// referenced file. A named `entity` capture (or, failing that, the first
/// capture group) overrides the row-derived entity name; a regex that does
/// not match its own row's filename is a configuration conflict.
fn apply_entity_regex(row: &mut FileRow) -> Result<(), IngestError> {
    let Some(pattern) = row.entity_regex.as_deref() else {
        return Ok(());
    };
    let regex = Regex::new(pattern).map_err(|e| {
        IngestError::configuration(format!("invalid entity_regex {pattern:?}: {e}"))
    })?;
    let filename = row.path.rsplit('/').next().unwrap_or(&row.path).to_string();
    let captures = regex.captures(&filename).ok_or_else(|| {
        IngestError::configuration(format!(
            "entity_regex {pattern:?} does not match filename {filename:?} for entity {}",
            row.entity
        ))
    })?;
    let name = captures
        .name("entity")
        .or_else(|| captures.get(1))
        .map_or_else(|| captures[0].to_string(), |m| m.as_str().to_string());
    if name != row.entity {
        debug!(from = %row.entity, to = %name, "entity_regex override");
        row.entity = name;
    }
    Ok(())
}

/// Parses a local copy of a manifest file into rows.
///
/// The manifest-level sequence and regex template are copied onto every
/// row; `entity_regex` overrides are applied here.
///
/// # Errors
///
/// Returns [`IngestError::Io`] when the file cannot be read and
/// [`IngestError::Configuration`] for malformed rows.
pub fn load_file_rows(
    local: &Path,
    separator: char,
    manifest: &Manifest,
) -> Result<Vec<FileRow>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator as u8)
        .flexible(true)
        .from_path(local)
        .map_err(|e| IngestError::configuration(format!("cannot open manifest {}: {e}", local.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| IngestError::configuration(format!("manifest has no header row: {e}")))?
        .clone();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            IngestError::configuration(format!("malformed manifest row {}: {e}", index + 2))
        })?;
        let get = |column: &str| {
            headers
                .iter()
                .position(|h| h == column)
                .and_then(|at| record.get(at))
        };

        let entity = non_empty(get("feed")).ok_or_else(|| {
            IngestError::configuration(format!("manifest row {} has no feed column", index + 2))
        })?;
        let path = non_empty(get("file_url")).ok_or_else(|| {
            IngestError::configuration(format!("manifest row {} has no file_url", index + 2))
        })?;

        let mut extra = BTreeMap::new();
        for (position, header) in headers.iter().enumerate() {
            if WELL_KNOWN_COLUMNS.contains(&header) {
                continue;
            }
            if let Some(value) = record.get(position).map(str::trim).filter(|v| !v.is_empty()) {
                extra.insert(header.to_string(), value.to_string());
            }
        }

        let mut row = FileRow {
            entity,
            version: non_empty(get("feed_version"))
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            path,
            timestamp: non_empty(get("timestamp")).unwrap_or_default(),
            checksum: non_empty(get("md5")).unwrap_or_else(|| "unknown".to_string()),
            export_type: ExportType::parse(get("export_type").unwrap_or_default())?,
            number_of_rows: non_empty(get("num_rows")),
            sequence: manifest.sequence,
            entity_regex: non_empty(get("entity_regex")),
            target_predicate: non_empty(get("target_predicate")),
            sheet_path: non_empty(get("sheet_path")),
            regex: manifest.regex.clone(),
            extra,
        };
        apply_entity_regex(&mut row)?;
        rows.push(row);
    }

    debug!(manifest = %manifest.path, rows = rows.len(), "loaded manifest rows");
    Ok(rows)
}

/// Groups rows by entity, enforcing that a manifest references exactly one
/// version per entity.
///
/// # Errors
///
/// Returns [`IngestError::Configuration`] when two rows for the same
/// entity carry different versions.
pub fn group_rows_by_entity(
    rows: Vec<FileRow>,
) -> Result<BTreeMap<String, Vec<FileRow>>, IngestError> {
    let mut grouped: BTreeMap<String, Vec<FileRow>> = BTreeMap::new();
    for row in rows {
        let bucket = grouped.entry(row.entity.clone()).or_default();
        if let Some(existing) = bucket.first() {
            if existing.version != row.version {
                return Err(IngestError::configuration(format!(
                    "manifest contains more than one version of entity {}: {} and {}",
                    row.entity, existing.version, row.version
                )));
            }
        }
        bucket.push(row);
    }
    Ok(grouped)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use tempfile::TempDir;

    fn manifest(sequence: Option<i64>) -> Manifest {
        Manifest {
            path: "data/manifest_1438758475.csv".to_string(),
            sequence,
            date: DateTime::from_timestamp(1_438_758_475, 0).unwrap().naive_utc(),
            regex: Some("manifest".to_string()),
            synthesized: false,
        }
    }

    fn write_manifest(contents: &str) -> (TempDir, std::path::PathBuf) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("manifest.csv");
        std::fs::write(&path, contents).unwrap();
        (temp, path)
    }

    #[test]
    fn test_load_rows_pipe_separated() {
        let (_temp, path) = write_manifest(
            "feed|file_url|timestamp|feed_version|num_rows|md5|export_type\n\
             Event|data/2015_08_16/events.csv|1438625626000|1.2||unknown|inc\n\
             User|data/2015_08_16/users.csv|1438625626000|1.0|42|abcd|full\n",
        );
        let rows = load_file_rows(&path, '|', &manifest(Some(1))).unwrap();
        assert_eq!(rows.len(), 2);

        let event = &rows[0];
        assert_eq!(event.entity, "Event");
        assert_eq!(event.version, "1.2");
        assert_eq!(event.path, "data/2015_08_16/events.csv");
        assert_eq!(event.timestamp, "1438625626000");
        assert_eq!(event.checksum, "unknown");
        assert_eq!(event.export_type, ExportType::Inc);
        assert_eq!(event.number_of_rows, None);
        assert_eq!(event.sequence, Some(1));
        assert_eq!(event.regex.as_deref(), Some("manifest"));

        let user = &rows[1];
        assert_eq!(user.export_type, ExportType::Full);
        assert_eq!(user.number_of_rows.as_deref(), Some("42"));
        assert_eq!(user.checksum, "abcd");
    }

    #[test]
    fn test_load_rows_preserves_unknown_columns() {
        let (_temp, path) = write_manifest(
            "feed|file_url|target_ads|custom_note\n\
             Event|data/e.csv|ads-1|hello\n",
        );
        let rows = load_file_rows(&path, '|', &manifest(None)).unwrap();
        assert_eq!(rows[0].extra.get("target_ads").unwrap(), "ads-1");
        assert_eq!(rows[0].extra.get("custom_note").unwrap(), "hello");
    }

    #[test]
    fn test_missing_version_defaults() {
        let (_temp, path) = write_manifest("feed|file_url\nEvent|data/e.csv\n");
        let rows = load_file_rows(&path, '|', &manifest(None)).unwrap();
        assert_eq!(rows[0].version, DEFAULT_VERSION);
        assert_eq!(rows[0].checksum, "unknown");
    }

    #[test]
    fn test_entity_regex_override() {
        let (_temp, path) = write_manifest(
            "feed|file_url|entity_regex\n\
             Raw|data/event_1_1471421346.csv|^(?P<entity>[a-z]+)_\n",
        );
        let rows = load_file_rows(&path, '|', &manifest(None)).unwrap();
        assert_eq!(rows[0].entity, "event");
    }

    #[test]
    fn test_entity_regex_conflict_is_fatal() {
        let (_temp, path) = write_manifest(
            "feed|file_url|entity_regex\n\
             Raw|data/event.csv|^nope-(?P<entity>[a-z]+)\n",
        );
        let error = load_file_rows(&path, '|', &manifest(None)).unwrap_err();
        assert!(matches!(error, IngestError::Configuration { .. }));
    }

    #[test]
    fn test_group_rows_single_version_per_entity() {
        let rows = vec![
            FileRow {
                entity: "Event".to_string(),
                version: "1.1".to_string(),
                ..FileRow::default()
            },
            FileRow {
                entity: "Event".to_string(),
                version: "1.1".to_string(),
                ..FileRow::default()
            },
            FileRow {
                entity: "User".to_string(),
                version: "1.0".to_string(),
                ..FileRow::default()
            },
        ];
        let grouped = group_rows_by_entity(rows).unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["Event"].len(), 2);
    }

    #[test]
    fn test_group_rows_rejects_two_versions_of_entity() {
        let rows = vec![
            FileRow {
                entity: "Event".to_string(),
                version: "1.1".to_string(),
                ..FileRow::default()
            },
            FileRow {
                entity: "Event".to_string(),
                version: "1.2".to_string(),
                ..FileRow::default()
            },
        ];
        let error = group_rows_by_entity(rows).unwrap_err();
        assert!(error.to_string().contains("more than one version of entity"));
    }
}
