//! Registry sources: where work items come from and how details are fetched
//!
//! This module defines:
//! - `WorkItem`, `DetailPayload` and `Record`, the data flowing through a crawl
//! - The `Discovery` and `DetailFetcher` traits implemented per jurisdiction
//! - `HtmlRegistry`, a selector-driven implementation for HTML registries
//! - HTTP client construction shared by every source

mod client;
mod html;

pub use client::{build_http_client, user_agent_string};
pub use html::{parse_detail, parse_listing, HtmlRegistry, ListingPage, RegistrySelectors};

use crate::fetch::FetchError;
use async_trait::async_trait;
use indexmap::IndexMap;
use thiserror::Error;

/// Fields returned by a detail fetch, in page order
pub type DetailPayload = IndexMap<String, String>;

/// One discovered unit of work, such as a facility on a registry listing
///
/// Identity is `id`. The attributes carry whatever discovery learned that the
/// detail fetch needs (typically a `profile_url`) plus listing columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub attributes: IndexMap<String, String>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: IndexMap::new(),
        }
    }

    /// Adds an attribute, replacing any previous value for the key
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// A successful result: the work item merged with its detail payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    id: String,
    fields: IndexMap<String, String>,
}

impl Record {
    /// Merges a work item with the detail fetched for it
    ///
    /// Fields are the union of the item's attributes and the detail payload.
    /// On a key collision the detail value wins, keeping the item's column
    /// position. A detail field named `id` is dropped: the record id is always
    /// the work item id.
    pub fn merge(item: &WorkItem, detail: DetailPayload) -> Self {
        let mut fields = item.attributes.clone();
        fields.shift_remove("id");
        for (key, value) in detail {
            if key == "id" {
                tracing::debug!(id = %item.id, "ignoring detail field named id");
                continue;
            }
            fields.insert(key, value);
        }
        Self {
            id: item.id.clone(),
            fields,
        }
    }

    /// Builds a record from already-merged parts (used when reloading output)
    pub fn from_parts(id: impl Into<String>, fields: IndexMap<String, String>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &IndexMap<String, String> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        if key == "id" {
            return Some(&self.id);
        }
        self.fields.get(key).map(String::as_str)
    }
}

/// Errors raised while discovering work items
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Invalid selector: {0}")]
    Selector(String),

    #[error("No work items found in {0}")]
    Empty(String),
}

/// Produces the full list of work items for a run
///
/// Must be deterministic enough that re-running after a partial crawl yields
/// a superset of the ids seen before, otherwise resume would skip nothing.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<WorkItem>, SourceError>;
}

/// Fetches the detail payload for one work item
///
/// Implementations report failures as typed `FetchError`s; the retrying
/// client decides which of them are worth another attempt.
#[async_trait]
pub trait DetailFetcher: Send + Sync {
    async fn fetch_detail(&self, item: &WorkItem) -> Result<DetailPayload, FetchError>;
}
