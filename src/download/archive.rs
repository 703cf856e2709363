//! Zip payload normalization.
//!
//! Data files may arrive zip-compressed. Downstream readers only handle
//! plain and gzip files, so the single zip entry is recompressed as gzip
//! next to the original, which is then removed. A zip with anything other
//! than exactly one entry is rejected.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::debug;

use crate::error::IngestError;

/// Recompresses a single-entry zip file as gzip and deletes the zip.
/// Returns the path of the gzip file.
///
/// # Errors
///
/// Returns [`IngestError::Configuration`] when the archive does not hold
/// exactly one entry and [`IngestError::Io`] for unreadable archives.
pub fn zip_to_gzip(path: &Path) -> Result<PathBuf, IngestError> {
    let file = File::open(path).map_err(|e| IngestError::io(path, e))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| IngestError::io(path, io::Error::other(e)))?;
    if archive.len() != 1 {
        return Err(IngestError::configuration(format!(
            "zip archive {} must contain exactly one entry, found {}",
            path.display(),
            archive.len()
        )));
    }
    let mut entry = archive
        .by_index(0)
        .map_err(|e| IngestError::io(path, io::Error::other(e)))?;

    let target = path.with_extension("gz");
    let out = File::create(&target).map_err(|e| IngestError::io(&target, e))?;
    let mut encoder = GzEncoder::new(BufWriter::new(out), Compression::default());
    io::copy(&mut entry, &mut encoder).map_err(|e| IngestError::io(&target, e))?;
    encoder
        .finish()
        .map_err(|e| IngestError::io(&target, e))?;
    drop(entry);

    std::fs::remove_file(path).map_err(|e| IngestError::io(path, e))?;
    debug!(from = %path.display(), to = %target.display(), "recompressed zip entry as gzip");
    Ok(target)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, contents) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_single_entry_zip_becomes_gzip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.zip");
        write_zip(&path, &[("events.csv", "ID,Country\n1,CZ\n")]);

        let target = zip_to_gzip(&path).unwrap();
        assert_eq!(target, temp.path().join("events.gz"));
        assert!(!path.exists());

        assert_eq!(
            crate::feed::read_header(&target).unwrap(),
            "ID,Country"
        );
        assert_eq!(crate::feed::count_rows(&target).unwrap(), 1);
    }

    #[test]
    fn test_multi_entry_zip_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bundle.zip");
        write_zip(&path, &[("a.csv", "x\n"), ("b.csv", "y\n")]);

        let error = zip_to_gzip(&path).unwrap_err();
        assert!(matches!(error, IngestError::Configuration { .. }));
        assert!(error.to_string().contains("found 2"));
        assert!(path.exists());
    }

    #[test]
    fn test_corrupt_zip_is_io_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.zip");
        std::fs::write(&path, "this is not a zip").unwrap();
        let error = zip_to_gzip(&path).unwrap_err();
        assert!(matches!(error, IngestError::Io { .. }));
    }
}
