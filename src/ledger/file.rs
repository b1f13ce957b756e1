//! File-backed ledger implementation

use crate::ledger::format::{encode_entry, parse_ledger, HEADER_PREFIX};
use crate::ledger::{LedgerEntry, LedgerError, ProgressLedger};
use crate::persist;
use crate::source::WorkItem;
use crate::state::ItemState;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only ledger stored as a text file
///
/// Each append opens the file in append mode, writes one whole line and
/// closes it. Appends are serialized by an internal lock, so concurrent
/// workers never interleave partial lines. `finished` entries are synced to
/// disk before `mark_finished` returns.
pub struct FileLedger {
    path: PathBuf,
    config_hash: Option<String>,
    persist_retries: u32,
    writer: Mutex<()>,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config_hash: None,
            persist_retries: 3,
            writer: Mutex::new(()),
        }
    }

    /// Records the configuration hash in the header of a new ledger
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    /// Attempts per append before reporting failure
    pub fn with_persist_retries(mut self, attempts: u32) -> Self {
        self.persist_retries = attempts.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn header(&self) -> String {
        match &self.config_hash {
            Some(hash) => format!("{} config={}\n", HEADER_PREFIX, hash),
            None => format!("{}\n", HEADER_PREFIX),
        }
    }

    fn io_error(&self, op: &'static str, source: io::Error) -> LedgerError {
        LedgerError::Io {
            op,
            path: self.path.clone(),
            source,
        }
    }

    async fn append(&self, entry: LedgerEntry, sync: bool) -> Result<(), LedgerError> {
        let line = encode_entry(&entry);
        let _guard = self.writer.lock().await;

        persist::with_retries(self.persist_retries, "ledger append", || {
            self.append_once(&line, sync)
        })
        .await
        .map_err(|e| self.io_error("append to", e))
    }

    async fn truncate(&self, len: u64) -> io::Result<()> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await?;
        file.set_len(len).await?;
        file.sync_all().await
    }

    async fn append_once(&self, line: &str, sync: bool) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        if sync {
            file.sync_data().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressLedger for FileLedger {
    async fn init(&self) -> Result<(), LedgerError> {
        let _guard = self.writer.lock().await;

        persist::ensure_parent_dir(&self.path)
            .await
            .map_err(|e| self.io_error("create directory for", e))?;

        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                if bytes.is_empty() || bytes.last() == Some(&b'\n') {
                    return Ok(());
                }

                // A torn last line is dropped, never completed
                let keep = bytes
                    .iter()
                    .rposition(|b| *b == b'\n')
                    .map_or(0, |end| end + 1);
                tracing::warn!(
                    "Ledger {} ends mid-line, dropping {} torn bytes",
                    self.path.display(),
                    bytes.len() - keep
                );
                self.truncate(keep as u64)
                    .await
                    .map_err(|e| self.io_error("repair", e))?;

                if keep == 0 {
                    tokio::fs::write(&self.path, self.header())
                        .await
                        .map_err(|e| self.io_error("create", e))?;
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!("Creating ledger at {}", self.path.display());
                tokio::fs::write(&self.path, self.header())
                    .await
                    .map_err(|e| self.io_error("create", e))
            }
            Err(e) => Err(self.io_error("open", e)),
        }
    }

    async fn load_entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(parse_ledger(&String::from_utf8_lossy(&bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.io_error("read", e)),
        }
    }

    async fn mark_in_progress(&self, item: &WorkItem) -> Result<(), LedgerError> {
        self.append(LedgerEntry::now(&item.id, ItemState::InProgress, None), false)
            .await
    }

    async fn mark_finished(&self, item: &WorkItem) -> Result<(), LedgerError> {
        self.append(LedgerEntry::now(&item.id, ItemState::Finished, None), true)
            .await
    }

    async fn mark_failed(&self, item: &WorkItem, cause: &str) -> Result<(), LedgerError> {
        self.append(
            LedgerEntry::now(&item.id, ItemState::Failed, Some(cause.to_string())),
            true,
        )
        .await
    }
}
