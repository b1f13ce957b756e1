//! HTTP client construction

use crate::config::UserAgentConfig;
use reqwest::Client;
use std::time::Duration;

/// Formats the user agent as `CrawlerName/Version (+ContactURL; ContactEmail)`
pub fn user_agent_string(config: &UserAgentConfig) -> String {
    format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    )
}

/// Builds the HTTP client shared by discovery and detail fetches of one run
///
/// The client is constructed per run and passed down; nothing here is a
/// process-wide singleton, so two runs in one process never share cookies.
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `attempt_timeout` - Upper bound for a whole request
///
/// # Example
///
/// ```no_run
/// use facility_harvester::config::UserAgentConfig;
/// use facility_harvester::source::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "FacilityHarvester".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    attempt_timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent_string(config))
        .timeout(attempt_timeout)
        .connect_timeout(Duration::from_secs(10).min(attempt_timeout))
        .gzip(true)
        .brotli(true)
        .build()
}
