//! Crawler module for resumable registry harvesting
//!
//! This module contains the core orchestration logic, including:
//! - The bounded work queue that limits items in flight
//! - The crawl driver: resume filtering, per-item sequencing, final flush
//! - Wiring a configuration into a ready-to-run driver

mod driver;
mod queue;

pub use driver::{CrawlDriver, HaltHandle, RunSummary};
pub use queue::{Drained, WorkQueue};

use crate::config::Config;
use crate::fetch::{FetchClient, RetryPolicy};
use crate::ledger::FileLedger;
use crate::output::CsvSink;
use crate::source::{build_http_client, HtmlRegistry};
use crate::HarvestError;
use std::sync::Arc;

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Build the HTTP client and the configured registry source
/// 2. Open the progress ledger and the output file
/// 3. Discover work items and skip those finished by earlier runs
/// 4. Fetch the rest with bounded concurrency and retries
/// 5. Flush the output and report counts
///
/// # Arguments
///
/// * `config` - The harvester configuration
/// * `config_hash` - Hash of the config file, recorded in a new ledger
/// * `halt` - Stops the run from starting new items when triggered
///
/// # Returns
///
/// * `Ok(RunSummary)` - The run finished or was halted cleanly
/// * `Err(HarvestError)` - The run as a whole failed
pub async fn crawl(
    config: Config,
    config_hash: &str,
    halt: HaltHandle,
) -> Result<RunSummary, HarvestError> {
    let policy = RetryPolicy::from(&config.crawler);
    let client = build_http_client(&config.user_agent, policy.attempt_timeout)?;
    let registry = Arc::new(HtmlRegistry::from_config(&config.source, client)?);

    let ledger = FileLedger::new(&config.output.ledger_path)
        .with_config_hash(config_hash)
        .with_persist_retries(config.crawler.persist_retries);

    let sink = CsvSink::open(
        &config.output.output_path,
        config.crawler.flush_every,
        config.crawler.persist_retries,
    )
    .await?;

    let driver = CrawlDriver::new(
        registry.clone(),
        FetchClient::new(registry, policy),
        Arc::new(ledger),
        Arc::new(sink),
        config.crawler.concurrency as usize,
    )
    .with_halt_handle(halt);

    driver.run().await
}
