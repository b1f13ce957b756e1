//! Output module for crawl results and reports
//!
//! This module handles:
//! - Writing successful records to the CSV output, incrementally
//! - Summarizing a finished run
//! - Auditing the progress ledger for `--stats`

mod sink;
pub mod stats;

pub use sink::{CsvSink, SinkError};
pub use stats::{
    load_ledger_report, print_ledger_report, print_run_summary, FailureRecord, LedgerReport,
};
