//! Run and ledger statistics
//!
//! This module turns a finished run, or the ledger of earlier runs, into the
//! counts printed at the end of a crawl and by `--stats`.

use crate::crawler::RunSummary;
use crate::ledger::{latest_states, LedgerEntry, LedgerError, ProgressLedger};
use crate::state::ItemState;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One item whose latest ledger entry is `failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub id: String,
    pub cause: String,
    pub timestamp: DateTime<Utc>,
}

/// Ledger audit: where every known item currently stands
#[derive(Debug, Clone, Default)]
pub struct LedgerReport {
    /// Number of distinct ids in the ledger
    pub total_items: u64,

    /// Count of ids by their latest state
    pub items_by_state: HashMap<ItemState, u64>,

    /// Total number of entries, including superseded ones
    pub total_entries: u64,

    /// Latest failures, oldest first
    pub failures: Vec<FailureRecord>,
}

impl LedgerReport {
    pub fn from_entries(entries: &[LedgerEntry]) -> Self {
        let latest = latest_states(entries);

        let mut items_by_state = HashMap::new();
        let mut failures = Vec::new();
        for entry in latest.values() {
            *items_by_state.entry(entry.state).or_insert(0) += 1;
            if entry.state.is_error() {
                failures.push(FailureRecord {
                    id: entry.id.clone(),
                    cause: entry
                        .error_detail
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string()),
                    timestamp: entry.timestamp,
                });
            }
        }
        failures.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));

        Self {
            total_items: latest.len() as u64,
            items_by_state,
            total_entries: entries.len() as u64,
            failures,
        }
    }

    pub fn count(&self, state: ItemState) -> u64 {
        self.items_by_state.get(&state).copied().unwrap_or(0)
    }
}

/// Loads the ledger and builds its report
pub async fn load_ledger_report(ledger: &dyn ProgressLedger) -> Result<LedgerReport, LedgerError> {
    let entries = ledger.load_entries().await?;
    Ok(LedgerReport::from_entries(&entries))
}

/// Prints a ledger report to stdout
pub fn print_ledger_report(report: &LedgerReport) {
    println!("=== Ledger Statistics ===\n");

    println!("Overview:");
    println!("  Items tracked: {}", report.total_items);
    println!("  Ledger entries: {}", report.total_entries);
    println!();

    println!("Items by State:");
    for state in ItemState::all_states() {
        let count = report.count(state);
        let percentage = if report.total_items > 0 {
            (count as f64 / report.total_items as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", state, count, percentage);
    }
    println!();

    if !report.failures.is_empty() {
        println!("Failures ({}):", report.failures.len());
        for failure in &report.failures {
            println!(
                "  - {} [{}]: {}",
                failure.id,
                failure.timestamp.format("%Y-%m-%d %H:%M:%S"),
                failure.cause
            );
        }
        println!();
    }

    let in_progress = report.count(ItemState::InProgress);
    if in_progress > 0 {
        println!(
            "{} items were in progress when a run stopped; they will be fetched again on resume.",
            in_progress
        );
    }
}

/// Prints the end-of-run summary to stdout
pub fn print_run_summary(summary: &RunSummary) {
    println!("=== Crawl Summary ===\n");
    println!("  Discovered: {}", summary.discovered);
    println!("  Already finished: {}", summary.already_finished);
    println!("  Pending: {}", summary.pending);
    println!("  Succeeded: {}", summary.succeeded);
    println!("  Failed: {}", summary.failed);
    if summary.skipped > 0 {
        println!("  Not attempted: {}", summary.skipped);
    }
    println!("  Elapsed: {:.1}s", summary.elapsed.as_secs_f64());

    if summary.interrupted {
        println!("\nRun was interrupted; re-run the same command to resume.");
    }
}
