//! Header and row-count extraction from local data files, gzip-aware.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::error::IngestError;

fn open(path: &Path) -> Result<Box<dyn Read>, IngestError> {
    let file = File::open(path).map_err(|e| IngestError::io(path, e))?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Reads the header row (first line, without the trailing newline) of a
/// plain or gzipped file.
///
/// # Errors
///
/// Returns [`IngestError::Io`] when the file cannot be opened or read; a
/// truncated gzip stream surfaces the same way.
pub fn read_header(path: &Path) -> Result<String, IngestError> {
    let mut reader = BufReader::new(open(path)?);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|e| IngestError::io(path, e))?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Counts data rows (lines after the header) of a plain or gzipped file.
///
/// # Errors
///
/// Returns [`IngestError::Io`] when the file cannot be read.
pub fn count_rows(path: &Path) -> Result<u64, IngestError> {
    let reader = BufReader::new(open(path)?);
    let mut lines: u64 = 0;
    for line in reader.lines() {
        let line = line.map_err(|e| IngestError::io(path, e))?;
        if !line.is_empty() {
            lines += 1;
        }
    }
    Ok(lines.saturating_sub(1))
}
