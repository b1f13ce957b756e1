//! Incremental CSV result sink
//!
//! Results accumulate in memory and the whole buffer is rewritten to disk on
//! every flush: encode to `<file>.tmp`, sync, then rename over the output.
//! Readers therefore only ever see a complete file, old or new.

use crate::persist;
use crate::source::Record;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Errors that can occur while loading or flushing the output file
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to {op} output {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("output {} has no id column", path.display())]
    MissingIdColumn { path: PathBuf },
}

impl SinkError {
    /// Returns true if the output location is unusable as a whole
    pub fn is_store_level(&self) -> bool {
        match self {
            Self::Io { source, .. } => persist::is_store_level(source),
            Self::Csv(_) | Self::MissingIdColumn { .. } => false,
        }
    }
}

/// Records collected so far, keyed by id in first-appended order
#[derive(Debug, Default)]
struct SinkBuffer {
    records: IndexMap<String, Record>,
    unflushed: usize,
}

/// CSV sink shared by all workers of a run
pub struct CsvSink {
    path: PathBuf,
    flush_every: usize,
    persist_retries: u32,
    buffer: Mutex<SinkBuffer>,
}

impl CsvSink {
    /// Opens the sink, loading any rows a previous run already wrote
    ///
    /// Flushes rewrite the whole file, so previous rows have to be in the
    /// buffer or the first flush of a resumed run would drop them.
    ///
    /// # Arguments
    ///
    /// * `path` - The output CSV file
    /// * `flush_every` - Appends between flushes (1 flushes after every result)
    /// * `persist_retries` - Attempts per flush before reporting failure
    pub async fn open(
        path: impl Into<PathBuf>,
        flush_every: usize,
        persist_retries: u32,
    ) -> Result<Self, SinkError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => decode_records(&bytes, &path)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => IndexMap::new(),
            Err(source) => {
                return Err(SinkError::Io {
                    op: "read",
                    path,
                    source,
                })
            }
        };

        if !records.is_empty() {
            tracing::info!(
                "Loaded {} existing records from {}",
                records.len(),
                path.display()
            );
        }

        Ok(Self {
            path,
            flush_every: flush_every.max(1),
            persist_retries: persist_retries.max(1),
            buffer: Mutex::new(SinkBuffer {
                records,
                unflushed: 0,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Adds a record to the buffer, replacing any earlier record with the
    /// same id in place. Returns true once enough records are waiting that
    /// the caller should flush.
    pub async fn append(&self, record: Record) -> bool {
        let mut buffer = self.buffer.lock().await;
        buffer.records.insert(record.id().to_string(), record);
        buffer.unflushed += 1;
        buffer.unflushed >= self.flush_every
    }

    /// Rewrites the output file from the whole buffer
    ///
    /// Holds the buffer lock for the duration, so appends wait and no two
    /// flushes overlap. Returns the number of rows written.
    pub async fn flush(&self) -> Result<usize, SinkError> {
        let mut buffer = self.buffer.lock().await;
        let bytes = encode_records(buffer.records.values())?;

        persist::with_retries(self.persist_retries, "output flush", || {
            write_replace(&self.path, &bytes)
        })
        .await
        .map_err(|source| SinkError::Io {
            op: "write",
            path: self.path.clone(),
            source,
        })?;

        buffer.unflushed = 0;
        tracing::debug!(
            "Flushed {} records to {}",
            buffer.records.len(),
            self.path.display()
        );
        Ok(buffer.records.len())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.buffer.lock().await.records.contains_key(id)
    }

    /// Ids of every record currently held
    pub async fn ids(&self) -> HashSet<String> {
        self.buffer.lock().await.records.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.buffer.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Encodes records as CSV: `id` first, then every other column in the order
/// it was first seen. Missing values are empty cells.
fn encode_records<'a>(
    records: impl Iterator<Item = &'a Record> + Clone,
) -> Result<Vec<u8>, csv::Error> {
    let mut columns: IndexSet<&str> = IndexSet::new();
    columns.insert("id");
    for record in records.clone() {
        columns.extend(record.fields().keys().map(String::as_str));
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&columns)?;
    for record in records {
        writer.write_record(columns.iter().map(|column| record.get(column).unwrap_or("")))?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

fn decode_records(bytes: &[u8], path: &Path) -> Result<IndexMap<String, Record>, SinkError> {
    let mut records = IndexMap::new();
    if bytes.is_empty() {
        return Ok(records);
    }

    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader.headers()?.clone();
    let id_index = headers
        .iter()
        .position(|h| h == "id")
        .ok_or_else(|| SinkError::MissingIdColumn {
            path: path.to_path_buf(),
        })?;

    for row in reader.records() {
        let row = row?;
        let mut id = String::new();
        let mut fields = IndexMap::new();
        for (index, (column, value)) in headers.iter().zip(row.iter()).enumerate() {
            if index == id_index {
                id = value.to_string();
            } else {
                fields.insert(column.to_string(), value.to_string());
            }
        }
        if !id.is_empty() {
            records.insert(id.clone(), Record::from_parts(id, fields));
        }
    }

    Ok(records)
}

/// Writes `bytes` beside `path` and renames it into place
async fn write_replace(path: &Path, bytes: &[u8]) -> io::Result<()> {
    persist::ensure_parent_dir(path).await?;

    let mut tmp_name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("output"));
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await
}
