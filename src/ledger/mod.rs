//! Durable progress ledger
//!
//! The ledger is an append-only log of per-item states. It answers one
//! question on startup: which ids were finished by an earlier run and must
//! not be fetched again.
//!
//! # Store format
//!
//! ```text
//! # facility-harvester progress ledger v1 config=<sha256>
//! 2026-03-01T10:00:00.000Z	in_progress	LIC-1
//! 2026-03-01T10:00:01.250Z	finished	LIC-1
//! 2026-03-01T10:00:02.000Z	failed	LIC-2	HTTP 404
//! ```
//!
//! One tab-separated entry per line: timestamp, state, id and an optional
//! error. The latest entry for an id wins. Lines that do not parse, and a
//! trailing line without its newline, are ignored.

mod file;
mod format;

pub use file::FileLedger;
pub use format::{encode_entry, latest_states, parse_ledger, HEADER_PREFIX};

use crate::persist;
use crate::source::WorkItem;
use crate::state::ItemState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

/// One line of the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub state: ItemState,
    pub id: String,
    pub error_detail: Option<String>,
}

impl LedgerEntry {
    pub fn now(id: impl Into<String>, state: ItemState, error_detail: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            state,
            id: id.into(),
            error_detail,
        }
    }
}

/// Errors that can occur while reading or appending to the ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to {op} ledger {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LedgerError {
    /// Returns true if the whole ledger is unusable, not just one write
    pub fn is_store_level(&self) -> bool {
        match self {
            Self::Io { source, .. } => persist::is_store_level(source),
        }
    }
}

/// Trait for progress ledger implementations
///
/// Implementations must serialize their own appends: workers call the
/// `mark_*` methods concurrently and never touch the backing store directly.
#[async_trait]
pub trait ProgressLedger: Send + Sync {
    /// Ensures the backing store exists. Idempotent.
    async fn init(&self) -> Result<(), LedgerError>;

    /// Reads every well-formed entry in file order
    async fn load_entries(&self) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Appends an `in_progress` entry (diagnostic only)
    async fn mark_in_progress(&self, item: &WorkItem) -> Result<(), LedgerError>;

    /// Appends a `finished` entry. Once this returns `Ok`, every later
    /// `load_finished_ids` includes the id.
    async fn mark_finished(&self, item: &WorkItem) -> Result<(), LedgerError>;

    /// Appends a `failed` entry carrying the cause
    async fn mark_failed(&self, item: &WorkItem, cause: &str) -> Result<(), LedgerError>;

    /// Returns the ids whose latest entry is `finished`
    async fn load_finished_ids(&self) -> Result<HashSet<String>, LedgerError> {
        let entries = self.load_entries().await?;
        Ok(latest_states(&entries)
            .into_iter()
            .filter(|(_, entry)| entry.state.is_done())
            .map(|(id, _)| id)
            .collect())
    }
}
