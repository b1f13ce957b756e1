//! Facility Harvester: a resumable registry crawler
//!
//! This crate harvests public healthcare-facility registries. A discovery
//! pass lists facilities, a bounded pool of workers fetches each detail
//! record with retries, an append-only ledger tracks progress so an
//! interrupted run picks up where it stopped, and results are flushed to a
//! CSV file as they arrive.

pub mod config;
pub mod crawler;
pub mod fetch;
pub mod ledger;
pub mod output;
mod persist;
pub mod source;
pub mod state;

use thiserror::Error;

/// Main error type for Facility Harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),

    #[error("Output error: {0}")]
    Sink(#[from] output::SinkError),

    #[error("Discovery failed: {0}")]
    Discovery(#[from] source::SourceError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Store unavailable, run aborted: {0}")]
    StoreUnavailable(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid CSS selector: {0}")]
    InvalidSelector(String),
}

/// Result type alias for Facility Harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlDriver, RunSummary};
pub use fetch::{FetchError, FetchOutcome, RetryPolicy};
pub use source::{DetailPayload, Record, WorkItem};
pub use state::ItemState;
