//! Error types for the ingestion engine.
//!
//! Every error in this taxonomy is fatal to the current run: the
//! orchestrator propagates it to its caller, which owns any run-level retry
//! policy. Nothing here is retried internally.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during a manifest ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Bad manifest pattern, entity-set mismatch between manifest and
    /// configuration, or an invalid option combination.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the misconfiguration.
        message: String,
    },

    /// A manifest arrived out of sequence (gap or duplicate).
    #[error(
        "manifest {path} is out of sequence: expected {expected}, found {found}"
    )]
    Sequence {
        /// The offending manifest path.
        path: String,
        /// The sequence number the run expected next.
        expected: i64,
        /// The sequence number the manifest carries.
        found: i64,
    },

    /// Checksum or column-count mismatch on a downloaded file.
    #[error("integrity check failed for {path}: expected {expected}, got {actual}")]
    Integrity {
        /// The file that failed verification.
        path: String,
        /// Expected checksum or count.
        expected: String,
        /// Observed checksum or count.
        actual: String,
    },

    /// Unsupported schema change (type changes are never auto-applied) or
    /// an unrecognized field type in a feed definition.
    #[error("schema error for entity {entity}: {message}")]
    Schema {
        /// The entity whose schema is affected.
        entity: String,
        /// Description of the rejected change.
        message: String,
    },

    /// A file referenced by the manifest does not exist at the backend.
    #[error("referenced file not found: {path}")]
    NotFound {
        /// The missing remote path.
        path: String,
    },

    /// Transfer, decrypt, or local file system failure.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path involved in the failed operation.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a sequence violation error.
    pub fn sequence(path: impl Into<String>, expected: i64, found: i64) -> Self {
        Self::Sequence {
            path: path.into(),
            expected,
            found,
        }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(
        path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Integrity {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a schema error.
    pub fn schema(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Creates a missing-file error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// We intentionally do NOT implement `From<std::io::Error>`: every IO failure
// needs the path it occurred on, which the source error does not carry. The
// `io()` constructor is the supported conversion.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let error = IngestError::configuration("manifest pattern has no time placeholder");
        let msg = error.to_string();
        assert!(msg.contains("configuration error"), "in: {msg}");
        assert!(msg.contains("time placeholder"), "in: {msg}");
    }

    #[test]
    fn test_sequence_error_display() {
        let error = IngestError::sequence("data/manifest_3.csv", 2, 4);
        let msg = error.to_string();
        assert!(msg.contains("out of sequence"), "in: {msg}");
        assert!(msg.contains("expected 2"), "in: {msg}");
        assert!(msg.contains("found 4"), "in: {msg}");
    }

    #[test]
    fn test_integrity_error_display() {
        let error = IngestError::integrity("a/b.csv", "d41d8cd9", "ffffffff");
        let msg = error.to_string();
        assert!(msg.contains("integrity check failed"), "in: {msg}");
        assert!(msg.contains("d41d8cd9"), "in: {msg}");
    }

    #[test]
    fn test_schema_error_display() {
        let error = IngestError::schema("Event", "type change for field ID is not supported");
        let msg = error.to_string();
        assert!(msg.contains("Event"), "in: {msg}");
        assert!(msg.contains("not supported"), "in: {msg}");
    }

    #[test]
    fn test_io_error_keeps_path_context() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error = IngestError::io(PathBuf::from("/tmp/x.csv"), io);
        assert!(error.to_string().contains("/tmp/x.csv"));
    }
}
