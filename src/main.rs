//! Facility Harvester main entry point
//!
//! This is the command-line interface for the resumable registry crawler.

use anyhow::Context;
use clap::Parser;
use facility_harvester::config::{load_config_with_hash, Config};
use facility_harvester::crawler::{crawl, HaltHandle};
use facility_harvester::output::print_run_summary;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Facility Harvester: a resumable registry crawler
///
/// Facility Harvester lists the facilities of a public healthcare registry,
/// fetches each facility's detail page with bounded concurrency and retries,
/// and writes the results to CSV. Interrupted runs resume where they stopped.
#[derive(Parser, Debug)]
#[command(name = "facility-harvester")]
#[command(version = "1.0.0")]
#[command(about = "A resumable healthcare registry crawler", long_about = None)]
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

    /// Start a fresh crawl, moving the previous ledger and output aside
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    fresh: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the progress ledger and exit
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
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config).await?;
    } else {
        handle_crawl(config, &config_hash, cli.fresh).await?;
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
            0 => EnvFilter::new("facility_harvester=info,warn"),
            1 => EnvFilter::new("facility_harvester=debug,info"),
            2 => EnvFilter::new("facility_harvester=trace,debug"),
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

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Facility Harvester Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Concurrency: {}", config.crawler.concurrency);
    println!("  Max retries: {}", config.crawler.max_retries);
    println!("  Attempt timeout: {}ms", config.crawler.attempt_timeout_ms);
    println!(
        "  Retryable status codes: {:?}",
        config.crawler.retryable_status_codes
    );
    println!(
        "  Backoff: {:?}, {}ms base, {}ms max",
        config.crawler.backoff.strategy,
        config.crawler.backoff.base_delay_ms,
        config.crawler.backoff.max_delay_ms
    );
    println!("  Flush every: {} records", config.crawler.flush_every);

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);
    println!("  Contact Email: {}", config.user_agent.contact_email);

    println!("\nOutput:");
    println!("  Ledger: {}", config.output.ledger_path);
    println!("  CSV: {}", config.output.output_path);

    println!("\nListing URLs ({}):", config.source.listing_urls.len());
    for url in &config.source.listing_urls {
        println!("  - {}", url);
    }
    println!("  Up to {} pages each", config.source.max_pages);

    println!("\nFields:");
    for name in config.source.listing_fields.keys() {
        println!("  - {} (listing)", name);
    }
    for name in config.source.detail_fields.keys() {
        println!("  - {} (detail)", name);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows where every item in the ledger stands
async fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use facility_harvester::ledger::FileLedger;
    use facility_harvester::output::{load_ledger_report, print_ledger_report, CsvSink};

    println!("Ledger: {}", config.output.ledger_path);

    let ledger = FileLedger::new(&config.output.ledger_path);
    let report = load_ledger_report(&ledger)
        .await
        .context("Failed to read the progress ledger")?;

    let sink = CsvSink::open(&config.output.output_path, 1, 1)
        .await
        .context("Failed to read the output file")?;
    println!(
        "Output: {} ({} rows)\n",
        config.output.output_path,
        sink.len().await
    );

    print_ledger_report(&report);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh crawl (previous state moved aside)");
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
        rotate(Path::new(&config.output.ledger_path), &stamp)?;
        rotate(Path::new(&config.output.output_path), &stamp)?;
    } else {
        tracing::info!("Starting crawl (will resume if an earlier run was interrupted)");
    }

    tracing::info!(
        "Listing URLs: {}, concurrency: {}",
        config.source.listing_urls.len(),
        config.crawler.concurrency
    );

    // Stop starting new items on Ctrl-C; in-flight items finish and flush
    let halt = HaltHandle::new();
    let signal_halt = halt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight items");
            signal_halt.halt();
        }
    });

    // Run the crawler
    match crawl(config, config_hash, halt).await {
        Ok(summary) => {
            tracing::info!("Crawl completed successfully");
            print_run_summary(&summary);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}

/// Renames `path` to `<path>.<stamp>.bak` if it exists
fn rotate(path: &Path, stamp: &str) -> anyhow::Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let mut backup = path.as_os_str().to_owned();
    backup.push(format!(".{}.bak", stamp));
    let backup = PathBuf::from(backup);

    std::fs::rename(path, &backup).with_context(|| {
        format!(
            "Failed to move {} to {}",
            path.display(),
            backup.display()
        )
    })?;
    tracing::info!("Moved {} to {}", path.display(), backup.display());
    Ok(())
}
