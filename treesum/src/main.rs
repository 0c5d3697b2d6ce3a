mod output;

use anyhow::{Context, Result};
use clap::Parser;
use output::{ManifestWriter, OutputFormat, SummaryOutput};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use treesum_core::{Algorithm, CollectingSink, Engine, ManifestSink, Outcome, RunConfig};

const EXIT_OK: u8 = 0;
const EXIT_FATAL: u8 = 1;
const EXIT_TIMEOUT: u8 = 2;
const EXIT_PARTIAL: u8 = 3;

/// Treesum - checksum every file and directory in a tree
#[derive(Parser)]
#[command(name = "treesum")]
#[command(about = "Concurrent checksum manifest for a directory tree", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory to checksum (defaults to the current directory)
    root: Option<PathBuf>,

    /// Worker threads (defaults to TREESUM_WORKERS env var or 6)
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Seconds to wait for the root checksum (defaults to TREESUM_TIMEOUT env var, or no limit)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Hash algorithm to use
    #[arg(long, default_value = "blake3")]
    algo: String,

    /// Output JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Print the manifest sorted by path once the run finishes
    #[arg(long)]
    sorted: bool,

    /// Skip entries excluded by .gitignore, .ignore and git exclude files
    #[arg(long)]
    gitignore: bool,

    /// Do not follow symbolic links
    #[arg(long)]
    no_follow_links: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let format = OutputFormat::new(cli.json);
    match run(&cli, format) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            output::write_error(format, &err, EXIT_FATAL);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// Log filter: TREESUM_LOG env var > -v/-q flags > warn.
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_env("TREESUM_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .init();
}

fn run(cli: &Cli, format: OutputFormat) -> Result<u8> {
    // Determine root: CLI arg > current directory
    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("Failed to read the current directory")?,
    };
    let root = root
        .canonicalize()
        .with_context(|| format!("Cannot resolve root: {}", root.display()))?;

    let config = build_config(cli)?;

    let writer = Arc::new(ManifestWriter::new(format));
    let collector = Arc::new(CollectingSink::new());
    let sink: Arc<dyn ManifestSink> = if cli.sorted {
        collector.clone()
    } else {
        writer.clone()
    };

    let report = Engine::new(config, sink)
        .run(&root)
        .with_context(|| format!("Failed to checksum {}", root.display()))?;

    if cli.sorted {
        for record in collector.take_sorted() {
            writer.write_record(&record)?;
        }
    }

    let code = match &report.outcome {
        Outcome::Completed { root: Ok(_) } => EXIT_OK,
        Outcome::Completed { root: Err(_) } => EXIT_PARTIAL,
        Outcome::TimedOut { .. } => EXIT_TIMEOUT,
    };
    output::write_summary(format, &SummaryOutput::from_report(&report, code))?;
    Ok(code)
}

/// Flag > environment variable > default.
fn build_config(cli: &Cli) -> Result<RunConfig> {
    let workers = match cli.workers {
        Some(workers) => Some(workers),
        None => env_number("TREESUM_WORKERS")?,
    };
    let timeout = match cli.timeout {
        Some(secs) => Some(secs),
        None => env_number("TREESUM_TIMEOUT")?,
    };
    let algorithm = Algorithm::parse(&cli.algo)
        .with_context(|| format!("Unsupported algorithm: {}", cli.algo))?;

    let mut config = RunConfig::default()
        .with_algorithm(algorithm)
        .with_timeout(timeout.map(Duration::from_secs))
        .with_follow_links(!cli.no_follow_links)
        .with_git_ignore(cli.gitignore);
    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }
    config.validate().context("Invalid options")?;
    Ok(config)
}

fn env_number<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid {}: {}", name, value)),
        Err(_) => Ok(None),
    }
}
