//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Manifest-driven ingestion of entity data files.
///
/// Ingestor discovers manifests at a storage backend, validates them,
/// reconciles entity schemas, downloads the referenced files, and commits
/// each processed manifest as a batch record.
#[derive(Parser, Debug)]
#[command(name = "ingestor")]
#[command(author, version, about)]
pub struct Args {
    /// Path to the JSON run configuration
    pub config: PathBuf,

    /// Root directory of the storage backend holding manifests and data
    #[arg(short = 's', long)]
    pub source_root: PathBuf,

    /// Root directory of the metadata store
    #[arg(short = 'm', long)]
    pub metadata_root: PathBuf,

    /// Entity-version date cache file (defaults to <METADATA_ROOT>/cache.json)
    #[arg(long)]
    pub cache_file: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Override the configured number of download workers (1-100)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub workers: Option<u8>,

    /// Override how many manifests this run may process
    #[arg(long)]
    pub manifests_per_run: Option<usize>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn base() -> Vec<&'static str> {
        vec![
            "ingestor",
            "config.json",
            "--source-root",
            "/srv/in",
            "--metadata-root",
            "/srv/meta",
        ]
    }

    #[test]
    fn test_cli_minimal_args_parse() {
        let args = Args::try_parse_from(base()).unwrap();
        assert_eq!(args.config, PathBuf::from("config.json"));
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.workers.is_none());
        assert!(args.cache_file.is_none());
    }

    #[test]
    fn test_cli_config_path_is_required() {
        let result = Args::try_parse_from([
            "ingestor",
            "--source-root",
            "/srv/in",
            "--metadata-root",
            "/srv/meta",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let mut argv = base();
        argv.push("-vv");
        let args = Args::try_parse_from(argv).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_workers_range_enforced() {
        let mut argv = base();
        argv.extend(["--workers", "8"]);
        let args = Args::try_parse_from(argv).unwrap();
        assert_eq!(args.workers, Some(8));

        let mut argv = base();
        argv.extend(["--workers", "0"]);
        let result = Args::try_parse_from(argv);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );

        let mut argv = base();
        argv.extend(["--workers", "101"]);
        assert!(Args::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_cli_manifests_per_run_override() {
        let mut argv = base();
        argv.extend(["--manifests-per-run", "5"]);
        let args = Args::try_parse_from(argv).unwrap();
        assert_eq!(args.manifests_per_run, Some(5));
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        // --help causes early exit, so we check it returns an error with Help kind
        let result = Args::try_parse_from(["ingestor", "--help"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let mut argv = base();
        argv.push("--invalid-flag");
        let result = Args::try_parse_from(argv);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::UnknownArgument
        );
    }
}
