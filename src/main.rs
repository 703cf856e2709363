//! CLI entry point for the ingestor tool.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ingestor_core::{
    IngestConfig, JsonMetadataStore, LocalBackend, MetadataCache, NoDecryptor, Orchestrator,
    RunContext,
};
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("Ingestor starting");

    let mut config = IngestConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    if let Some(workers) = args.workers {
        config.workers = usize::from(workers);
    }
    if let Some(count) = args.manifests_per_run {
        config.manifests_per_run = count;
    }
    config.validate()?;

    let backend = LocalBackend::new(&args.source_root)
        .with_context(|| format!("opening source root {}", args.source_root.display()))?;
    let store = JsonMetadataStore::new(
        &args.metadata_root,
        &config.downloader_id,
        config.entities.clone(),
    )
    .with_context(|| format!("opening metadata root {}", args.metadata_root.display()))?;
    let cache_file = args
        .cache_file
        .unwrap_or_else(|| args.metadata_root.join("cache.json"));

    let mut orchestrator = Orchestrator::new(RunContext {
        config: Arc::new(config),
        backend: Arc::new(backend),
        store: Arc::new(store),
        decryptor: Arc::new(NoDecryptor),
        cache: MetadataCache::new(cache_file),
    });

    let summary = orchestrator.run().await?;

    info!(
        manifests = summary.manifests_processed,
        files = summary.files_processed,
        "Ingestion complete"
    );

    Ok(())
}
