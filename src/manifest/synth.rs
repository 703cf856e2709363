//! Manifest synthesis for feeds that deliver bare data files.
//!
//! In generate mode there is no external manifest; one is synthesized from
//! the data folder listing. Data filenames follow
//! `<entity>_<version>_<epoch>.<ext>`; anything else in the folder is
//! ignored.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::debug;

use super::{ExportType, FileRow, Manifest};
use crate::backend::RemoteObject;

static DATA_FILE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // literal pattern
    Regex::new(r"^(?P<entity>[A-Za-z][A-Za-z0-9]*)_(?P<version>[0-9][0-9.]*)_(?P<time>\d+)\.(?P<ext>csv|gz|zip)(?:\.pgp)?$")
        .unwrap()
});

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Builds a synthesized manifest and its rows from a data folder listing.
///
/// Non-conforming keys are skipped silently. The manifest filename is
/// `manifest-YYYYmmddHHMMSS` so batch records stay self-describing even
/// without a retained manifest file.
#[must_use]
pub fn synthesize_manifest(objects: &[RemoteObject], now: NaiveDateTime) -> (Manifest, Vec<FileRow>) {
    let mut rows = Vec::new();
    for object in objects {
        let Some(captures) = DATA_FILE.captures(object.filename()) else {
            continue;
        };
        rows.push(FileRow {
            entity: capitalize(&captures["entity"]),
            version: captures["version"].to_string(),
            path: object.key.clone(),
            timestamp: captures["time"].to_string(),
            checksum: "unknown".to_string(),
            export_type: ExportType::Inc,
            ..FileRow::default()
        });
    }
    debug!(candidates = objects.len(), rows = rows.len(), "synthesized manifest");

    let manifest = Manifest {
        path: format!("manifest-{}", now.format("%Y%m%d%H%M%S")),
        sequence: None,
        date: now,
        regex: None,
        synthesized: true,
    };
    (manifest, rows)
}
