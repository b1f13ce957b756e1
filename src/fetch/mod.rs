//! Fetch-with-retry client
//!
//! This module wraps a jurisdiction's `DetailFetcher` with:
//! - A per-attempt wall-clock timeout
//! - Bounded retries on transient failures (timeouts, connection errors,
//!   and a configured set of HTTP status codes)
//! - Non-decreasing backoff between attempts, honoring `Retry-After`
//!
//! The client never returns an error: every call ends in a `FetchOutcome`.

mod client;
mod error;
mod policy;

pub use client::FetchClient;
pub use error::FetchError;
pub use policy::{Backoff, RetryPolicy};

use crate::source::Record;

/// Final result of fetching one work item
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The detail was fetched and merged with the work item
    Success(Record),

    /// The item could not be fetched
    Failure(FetchFailure),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Why a work item could not be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub id: String,

    /// Message of the last error seen
    pub cause: String,

    /// True if the item failed transiently on every allowed attempt; false
    /// for permanent failures that were not retried
    pub retries_exhausted: bool,

    /// Attempts made, including the first
    pub attempts: u32,
}
