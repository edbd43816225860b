//! Plucker main entry point
//!
//! Operator tool for the persistent crawl storage: runs cache maintenance
//! sweeps between crawls and judges the stats dump of a finished run.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plucker::cache::CacheStorage;
use plucker::config::{load_config, Config};
use plucker::run::{evaluate, RunContext, RunStats};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Plucker: persistent response cache and crawl frontier
#[derive(Parser, Debug)]
#[command(name = "plucker")]
#[command(version)]
#[command(about = "Maintenance and run evaluation for persistent crawl storage", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults apply when omitted)
    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delete expired and malformed entries from a spider's response cache
    Sweep {
        /// Spider whose cache namespace is swept
        #[arg(value_name = "SPIDER")]
        spider: String,

        /// Override the configured expiration window (seconds)
        #[arg(long)]
        expiration_secs: Option<u64>,

        /// Override the configured maximum number of entries examined
        #[arg(long)]
        max_items: Option<usize>,
    },

    /// Check a finished run's stats dump against the run policy
    Evaluate {
        /// JSON file with the run's stats
        #[arg(value_name = "STATS")]
        stats: PathBuf,

        /// Spider the stats belong to (selects its minimum item count)
        #[arg(long)]
        spider: Option<String>,

        /// Minimum item count, overriding the configuration
        #[arg(long)]
        min_items: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            load_config(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?
        }
        None => Config::default(),
    };

    match cli.command {
        Command::Sweep {
            spider,
            expiration_secs,
            max_items,
        } => handle_sweep(config, &spider, expiration_secs, max_items),
        Command::Evaluate {
            stats,
            spider,
            min_items,
        } => handle_evaluate(&config, &stats, spider.as_deref(), min_items),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("plucker=info,warn"),
            1 => EnvFilter::new("plucker=debug,info"),
            2 => EnvFilter::new("plucker=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the `sweep` command: one bounded maintenance pass over a cache
fn handle_sweep(
    mut config: Config,
    spider: &str,
    expiration_secs: Option<u64>,
    max_items: Option<usize>,
) -> Result<()> {
    if let Some(expiration_secs) = expiration_secs {
        config.cache.expiration_secs = expiration_secs;
    }
    if let Some(max_items) = max_items {
        anyhow::ensure!(max_items > 0, "--max-items must be at least 1");
        config.cache.expiration_max_items = max_items;
    }
    if config.cache.expiration_secs == 0 {
        tracing::info!("Expiration is disabled; only malformed entries will be removed");
    }

    let context = RunContext::open(spider, config).context("Failed to open storage")?;
    let result = CacheStorage::open(&context)
        .context("Failed to open the response cache")
        .and_then(|cache| {
            cache
                .sweep_at(chrono::Utc::now().timestamp())
                .context("Cache sweep failed")
        });
    context.close();

    let report = result?;
    println!("=== Cache Sweep: {} ===\n", spider);
    println!("  Examined: {}", report.examined);
    println!("  Deleted:  {}", report.deleted);
    println!("  Failed:   {}", report.failed);

    Ok(())
}

/// Handles the `evaluate` command: exits with an error if the run is rejected
fn handle_evaluate(
    config: &Config,
    stats_path: &Path,
    spider: Option<&str>,
    min_items: Option<u64>,
) -> Result<()> {
    let raw = std::fs::read_to_string(stats_path)
        .with_context(|| format!("Failed to read stats from {}", stats_path.display()))?;
    let stats: RunStats = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid stats JSON in {}", stats_path.display()))?;

    let min_items = min_items.unwrap_or_else(|| match spider {
        Some(spider) => config.run.min_items_for(spider),
        None => config.run.min_items,
    });
    tracing::debug!("Min items required: {}", min_items);

    match evaluate(&stats, min_items) {
        Ok(()) => {
            println!("✓ Run accepted ({} items)", stats.item_scraped_count);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Run rejected: {}", e);
            Err(plucker::PluckerError::from(e).into())
        }
    }
}
