//! Manifest discovery, selection, and expansion.
//!
//! A manifest is a discovered descriptor enumerating one batch's worth of
//! entity data files, carrying ordering metadata (sequence and/or date).
//! This module compiles the configured filename pattern, matches remote
//! keys into [`Manifest`]s, picks the next eligible one per processing
//! mode, expands it into [`FileRow`]s, and cross-checks it against
//! configuration and backend state.

mod pattern;
mod rows;
mod selector;
mod synth;
mod validator;

pub use pattern::{CompiledPattern, ManifestMatch};
pub use rows::{load_file_rows, group_rows_by_entity};
pub use selector::{check_sequence, find_manifest_to_process, sort_manifests};
pub use synth::synthesize_manifest;
pub use validator::{check_entities_against_config, check_referenced_files};

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::error::IngestError;

/// How a data file relates to what was previously ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportType {
    /// Complete snapshot of the entity.
    Full,
    /// Delta against the previous load.
    #[default]
    Inc,
}

impl ExportType {
    /// Parses a manifest `export_type` column. Empty values default to
    /// incremental.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Configuration`] for values outside
    /// `full`/`inc`.
    pub fn parse(raw: &str) -> Result<Self, IngestError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "inc" | "" => Ok(Self::Inc),
            other => Err(IngestError::configuration(format!(
                "unknown export_type {other:?}, expected full or inc"
            ))),
        }
    }

    /// The wire value stored in runtime metadata.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Inc => "inc",
        }
    }
}

/// A discovered manifest descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Remote key of the manifest file.
    pub path: String,
    /// Ordinal from the `{sequence}` capture; present only for
    /// sequence-mode patterns.
    pub sequence: Option<i64>,
    /// Timestamp parsed from the `{time(FORMAT)}` capture.
    pub date: NaiveDateTime,
    /// Manifest-level source regex template, propagated into each row.
    pub regex: Option<String>,
    /// True when the manifest was synthesized from the data folder rather
    /// than supplied externally; validation is skipped for these.
    pub synthesized: bool,
}

impl Manifest {
    /// Filename segment of the manifest path.
    #[must_use]
    pub fn filename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// One data file reference inside a manifest.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileRow {
    /// Entity id the file belongs to (after any `entity_regex` override).
    pub entity: String,
    /// Feed version of the entity schema this file conforms to.
    pub version: String,
    /// Remote path of the data file.
    pub path: String,
    /// Export timestamp recorded in the manifest.
    pub timestamp: String,
    /// Recorded checksum; the literal `unknown` disables verification.
    pub checksum: String,
    /// Snapshot or delta.
    pub export_type: ExportType,
    /// Row count recorded in the manifest, when known.
    pub number_of_rows: Option<String>,
    /// Manifest sequence, copied onto every row.
    pub sequence: Option<i64>,
    /// Optional regex overriding the row-derived entity name.
    pub entity_regex: Option<String>,
    /// Opaque passthrough predicate for downstream consumers.
    pub target_predicate: Option<String>,
    /// Sheet locator for workbook-shaped sources.
    pub sheet_path: Option<String>,
    /// Manifest-level regex template, copied onto every row.
    pub regex: Option<String>,
    /// Any further manifest columns, preserved verbatim.
    pub extra: BTreeMap<String, String>,
}

impl FileRow {
    /// Filename segment of the remote data path.
    #[must_use]
    pub fn filename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Whether checksum verification applies to this file.
    #[must_use]
    pub fn has_checksum(&self) -> bool {
        !self.checksum.is_empty() && self.checksum != "unknown"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_export_type_parse() {
        assert_eq!(ExportType::parse("full").unwrap(), ExportType::Full);
        assert_eq!(ExportType::parse("FULL").unwrap(), ExportType::Full);
        assert_eq!(ExportType::parse("inc").unwrap(), ExportType::Inc);
        assert_eq!(ExportType::parse("").unwrap(), ExportType::Inc);
        assert!(ExportType::parse("delta").is_err());
    }

    #[test]
    fn test_file_row_checksum_gate() {
        let mut row = FileRow {
            checksum: "unknown".to_string(),
            ..FileRow::default()
        };
        assert!(!row.has_checksum());
        row.checksum = "d41d8cd98f00b204e9800998ecf8427e".to_string();
        assert!(row.has_checksum());
        row.checksum = String::new();
        assert!(!row.has_checksum());
    }

    #[test]
    fn test_manifest_filename() {
        let manifest = Manifest {
            path: "data/in/manifest_1438758475.csv".to_string(),
            sequence: None,
            date: chrono::DateTime::from_timestamp(1_438_758_475, 0)
                .unwrap()
                .naive_utc(),
            regex: None,
            synthesized: false,
        };
        assert_eq!(manifest.filename(), "manifest_1438758475.csv");
    }
}
