//! MedDRA Ingest - load MedDRA ASCII files into PostgreSQL

use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use clap::{ArgGroup, Parser};
use meddra_common::logging::{init_logging, LogConfig, LogLevel};
use meddra_ingest::config::{AppConfig, ProcessingConfig, ProcessingOverrides};
use meddra_ingest::progress::ProgressBarObserver;
use meddra_ingest::registry::SchemaRegistry;
use meddra_ingest::runner::{dry_run, RunTarget, Runner};
use meddra_ingest::storage::PgStorage;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "meddra-ingest")]
#[command(author, about = "Load MedDRA ASCII files into PostgreSQL")]
#[command(group(ArgGroup::new("target").required(true).args(["file_path", "path"])))]
struct Cli {
    /// Process a single .asc file
    #[arg(long)]
    file_path: Option<PathBuf>,

    /// Process every .asc file in a directory
    #[arg(long)]
    path: Option<PathBuf>,

    /// MedDRA version stamped on every row (e.g. 28.0)
    #[arg(long = "version", value_parser = parse_version)]
    meddra_version: Option<BigDecimal>,

    /// Language tag stamped on every row
    #[arg(long)]
    language: Option<String>,

    /// Rows per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// File encoding (WHATWG label)
    #[arg(long)]
    encoding: Option<String>,

    /// Field separator
    #[arg(long)]
    separator: Option<char>,

    /// JSON file with schema mappings, replacing the built-in ones
    #[arg(long, env = "MEDDRA_REGISTRY")]
    registry: Option<PathBuf>,

    /// Parse and check files without writing to the database
    #[arg(long)]
    dry_run: bool,

    /// Show a progress bar per file
    #[arg(long)]
    progress: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn target(&self) -> Result<RunTarget> {
        match (&self.file_path, &self.path) {
            (Some(file), None) => Ok(RunTarget::File(file.clone())),
            (None, Some(dir)) => Ok(RunTarget::Directory(dir.clone())),
            _ => anyhow::bail!("exactly one of --file-path or --path is required"),
        }
    }

    fn overrides(&self) -> ProcessingOverrides {
        ProcessingOverrides {
            version: self.meddra_version.clone(),
            language: self.language.clone(),
            batch_size: self.batch_size,
            encoding: self.encoding.clone(),
            separator: self.separator,
        }
    }
}

fn parse_version(value: &str) -> Result<BigDecimal, String> {
    BigDecimal::from_str(value.trim()).map_err(|e| format!("invalid version '{}': {}", value, e))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = match log_config(LogConfig::from_env(), cli.verbose) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid logging configuration: {:#}", e);
            return ExitCode::FAILURE;
        },
    };

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return ExitCode::FAILURE;
        },
    };

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        },
    }
}

/// Logging settings from `LOG_*`, with `--verbose` forcing debug level
fn log_config(from_env: Result<LogConfig>, verbose: bool) -> Result<LogConfig> {
    let config = from_env.context("Failed to read LOG_* variables")?;
    if verbose {
        return Ok(LogConfig {
            level: LogLevel::Debug,
            ..config
        });
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<bool> {
    let target = cli.target()?;

    let registry = match &cli.registry {
        Some(path) => SchemaRegistry::from_json_file(path)
            .with_context(|| format!("Failed to load registry from {}", path.display()))?,
        None => SchemaRegistry::meddra().context("Failed to build built-in registry")?,
    };
    let registry = Arc::new(registry);

    if cli.dry_run {
        let config = ProcessingConfig::load(cli.overrides())?;
        log_processing_config(&config, cli.verbose);

        let report = dry_run(&target, registry, &config).await?;
        report.log();
        return Ok(report.is_success());
    }

    let config = AppConfig::load(cli.overrides())?;
    log_processing_config(&config.processing, cli.verbose);

    let storage = Arc::new(
        PgStorage::connect_lazy(&config.database).context("Failed to configure database pool")?,
    );

    let mut runner = Runner::new(storage.clone(), registry, &config.processing);
    if cli.progress {
        runner = runner.with_observer(Arc::new(ProgressBarObserver::new()));
    }

    let outcome = runner.run(&target).await;
    storage.close().await;

    let report = outcome?;
    info!(
        success = report.is_success(),
        records = report.total_records(),
        "Run finished"
    );
    Ok(report.is_success())
}

fn log_processing_config(config: &ProcessingConfig, verbose: bool) {
    if verbose {
        info!(
            version = %config.version,
            language = %config.language,
            batch_size = config.batch_size,
            encoding = %config.encoding,
            separator = %config.separator,
            "Configuration"
        );
    }
}
