use indexmap::IndexMap;
use serde::Deserialize;

/// Main configuration structure for Facility Harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    pub source: SourceConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of detail fetches in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Retries after the first attempt for transient failures
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Wall-clock limit for a single fetch attempt (milliseconds)
    #[serde(rename = "attempt-timeout-ms", default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// HTTP status codes treated as transient
    #[serde(
        rename = "retryable-status-codes",
        default = "default_retryable_status_codes"
    )]
    pub retryable_status_codes: Vec<u16>,

    /// Flush the output file after this many new results
    #[serde(rename = "flush-every", default = "default_flush_every")]
    pub flush_every: usize,

    /// Attempts for ledger appends and output flushes before giving up
    #[serde(rename = "persist-retries", default = "default_persist_retries")]
    pub persist_retries: u32,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            retryable_status_codes: default_retryable_status_codes(),
            flush_every: default_flush_every(),
            persist_retries: default_persist_retries(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Delay schedule between retry attempts
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Delay before the first retry (milliseconds)
    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay (milliseconds)
    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Linear,
    #[default]
    Exponential,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the append-only progress ledger
    #[serde(rename = "ledger-path")]
    pub ledger_path: String,

    /// Path to the CSV file holding fetched records
    #[serde(rename = "output-path")]
    pub output_path: String,
}

/// Registry source configuration (listing and detail page selectors)
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Listing pages that enumerate facilities
    #[serde(rename = "listing-urls")]
    pub listing_urls: Vec<String>,

    /// Selector matching one element per facility on a listing page
    #[serde(rename = "item-selector")]
    pub item_selector: String,

    /// Selector, inside an item, of the anchor pointing at the detail page
    #[serde(rename = "link-selector")]
    pub link_selector: String,

    /// Selector, inside an item, whose text is the facility id
    #[serde(rename = "id-selector", default)]
    pub id_selector: Option<String>,

    /// Selector of the "next page" anchor on a listing page
    #[serde(rename = "next-page-selector", default)]
    pub next_page_selector: Option<String>,

    /// Listing pages followed per listing url
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: u32,

    /// Column name -> selector, read from each listing item
    #[serde(rename = "listing-fields", default)]
    pub listing_fields: IndexMap<String, String>,

    /// Column name -> selector, read from the detail page
    #[serde(rename = "detail-fields", default)]
    pub detail_fields: IndexMap<String, String>,
}

fn default_concurrency() -> u32 {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_attempt_timeout_ms() -> u64 {
    30_000
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![408, 413, 429, 500, 502, 503, 504]
}

fn default_flush_every() -> usize {
    1
}

fn default_persist_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_pages() -> u32 {
    50
}
