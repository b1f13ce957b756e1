use crate::config::types::{
    BackoffConfig, Config, CrawlerConfig, OutputConfig, SourceConfig, UserAgentConfig,
};
use crate::ConfigError;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_source_config(&config.source)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    if config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 10, got {}",
            config.max_retries
        )));
    }

    if config.attempt_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "attempt_timeout_ms must be >= 100ms, got {}ms",
            config.attempt_timeout_ms
        )));
    }

    if let Some(code) = config
        .retryable_status_codes
        .iter()
        .find(|code| !(100..=599).contains(*code))
    {
        return Err(ConfigError::Validation(format!(
            "retryable_status_codes must be HTTP status codes, got {}",
            code
        )));
    }

    if config.flush_every < 1 {
        return Err(ConfigError::Validation(
            "flush_every must be >= 1".to_string(),
        ));
    }

    if config.persist_retries < 1 {
        return Err(ConfigError::Validation(
            "persist_retries must be >= 1".to_string(),
        ));
    }

    validate_backoff(&config.backoff)
}

fn validate_backoff(config: &BackoffConfig) -> Result<(), ConfigError> {
    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base_delay_ms ({}) must not exceed max_delay_ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.ledger_path.is_empty() {
        return Err(ConfigError::Validation(
            "ledger_path cannot be empty".to_string(),
        ));
    }

    if config.output_path.is_empty() {
        return Err(ConfigError::Validation(
            "output_path cannot be empty".to_string(),
        ));
    }

    // Each file has exactly one writer; sharing a path would interleave them
    if config.ledger_path == config.output_path {
        return Err(ConfigError::Validation(format!(
            "ledger_path and output_path must differ, both are '{}'",
            config.output_path
        )));
    }

    Ok(())
}

/// Validates registry source configuration
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    if config.listing_urls.is_empty() {
        return Err(ConfigError::Validation(
            "source must have at least one listing url".to_string(),
        ));
    }

    for listing in &config.listing_urls {
        let url = Url::parse(listing).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid listing url '{}': {}", listing, e))
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Listing url '{}' must use http or https",
                listing
            )));
        }
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(
            "max_pages must be >= 1".to_string(),
        ));
    }

    validate_selector("item-selector", &config.item_selector)?;
    validate_selector("link-selector", &config.link_selector)?;
    if let Some(selector) = &config.id_selector {
        validate_selector("id-selector", selector)?;
    }
    if let Some(selector) = &config.next_page_selector {
        validate_selector("next-page-selector", selector)?;
    }

    for (name, selector) in config
        .listing_fields
        .iter()
        .chain(config.detail_fields.iter())
    {
        if name.is_empty() || name == "id" {
            return Err(ConfigError::Validation(format!(
                "field name '{}' is reserved or empty",
                name
            )));
        }
        validate_selector(name, selector)?;
    }

    Ok(())
}

/// Checks that a CSS selector parses
fn validate_selector(name: &str, selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector(format!("{} '{}': {}", name, selector, e)))
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
