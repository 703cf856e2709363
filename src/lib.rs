//! Ingestor Core Library
//!
//! This library implements a manifest-driven ingestion engine: it
//! discovers manifest files at a storage backend, validates them against
//! the configured entity set, reconciles entity schemas with what each
//! feed declares, downloads the referenced data files with integrity
//! checks, and commits the result as a batch record.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`backend`] - Storage backend seam and the local filesystem adapter
//! - [`config`] - Run configuration loading and validation
//! - [`manifest`] - Pattern compilation, discovery, selection, expansion
//! - [`feed`] - Feed schema construction and data file reading
//! - [`schema`] - Schema diffing between stored and declared fields
//! - [`download`] - Bounded-concurrency download and commit pipeline
//! - [`metadata`] - Entity, batch, and cache persistence
//! - [`run`] - The orchestrator state machine driving one run

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod decrypt;
pub mod download;
pub mod error;
pub mod feed;
pub mod manifest;
pub mod metadata;
pub mod run;
pub mod schema;

// Re-export commonly used types
pub use backend::{ListMode, LocalBackend, RemoteObject, StorageBackend};
pub use config::{DEFAULT_WORKERS, IngestConfig, ProcessMode};
pub use decrypt::{Decryptor, NoDecryptor};
pub use download::{DownloadCoordinator, DownloadItem};
pub use error::IngestError;
pub use manifest::{CompiledPattern, ExportType, FileRow, Manifest};
pub use metadata::{Batch, Entity, Field, JsonMetadataStore, MetadataCache, MetadataStore};
pub use run::{Orchestrator, RunContext, RunState, RunSummary};
