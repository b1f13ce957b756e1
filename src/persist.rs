//! Shared helpers for the two durable stores (ledger and output file)

use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Duration;

const RETRY_STEP: Duration = Duration::from_millis(50);

/// Runs an I/O operation up to `attempts` times, sleeping a little longer
/// after each failure. Returns the last error if every attempt fails.
pub(crate) async fn with_retries<T, F, Fut>(attempts: u32, what: &str, mut op: F) -> io::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(attempt, error = %e, "{} failed, retrying", what);
                tokio::time::sleep(RETRY_STEP * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Returns true when an I/O error means the store as a whole is unusable
/// rather than a one-off hiccup on a single write.
pub fn is_store_level(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied
            | io::ErrorKind::NotFound
            | io::ErrorKind::StorageFull
            | io::ErrorKind::ReadOnlyFilesystem
    )
}

/// Creates the parent directory of `path` if it has one
pub(crate) async fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}
