//! Pricecrawl main entry point
//!
//! This is the command-line interface for the Pricecrawl catalog crawler.

use anyhow::Context;
use clap::Parser;
use pricecrawl::config::{load_config_with_hash, Config};
use pricecrawl::crawler::{describe_plan, has_previous_state, Coordinator};
use pricecrawl::output::{load_statistics, print_statistics};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Pricecrawl: crash-safe product and price acquisition
///
/// Pricecrawl crawls catalog sites with a bounded pool of browser sessions
/// or plain HTTP, caches every captured page, and persists progress so an
/// interrupted or restarted run picks up where it left off.
#[derive(Parser, Debug)]
#[command(name = "pricecrawl")]
#[command(version = "1.0.0")]
#[command(about = "Crash-safe catalog crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Delete the crawl state file before starting (cached pages are kept)
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the crawl state file and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("pricecrawl=info,warn"),
            1 => EnvFilter::new("pricecrawl=debug,info"),
            2 => EnvFilter::new("pricecrawl=trace,debug"),
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

/// Handles the --dry-run mode: shows the resolved plan
fn handle_dry_run(config: &Config) {
    println!("=== Pricecrawl Dry Run ===\n");
    println!("{}", describe_plan(config));
    println!("\n✓ Configuration is valid");
    if has_previous_state(config) {
        println!("✓ Would resume from {}", config.state_path().display());
    } else {
        println!("✓ Would start a new crawl");
    }
}

/// Handles the --stats mode: summarizes the crawl state file
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let path = config.state_path();
    let summary = load_statistics(config)
        .with_context(|| format!("Failed to read crawl state from {}", path.display()))?;
    print_statistics(&path, &summary);
    Ok(())
}

/// Handles the main crawl operation
///
/// Ctrl-C stops the workers, then state is saved and every agent closed.
async fn handle_crawl(config: Config, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh crawl (ignoring previous state)");
    } else if has_previous_state(&config) {
        tracing::info!("Resuming from {}", config.state_path().display());
    }

    let coordinator = Coordinator::new(config, fresh)
        .await
        .context("Failed to initialize crawl")?;

    let result = tokio::select! {
        result = coordinator.run() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    if result.is_none() {
        tracing::warn!("Interrupted; saving state and closing agents");
    }
    coordinator.shutdown().await;

    match result {
        Some(Ok(_)) => {
            tracing::info!("Crawl completed successfully");
            Ok(())
        }
        Some(Err(e)) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e).context("Crawl failed")
        }
        None => Ok(()),
    }
}
