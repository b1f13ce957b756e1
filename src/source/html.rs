//! Selector-driven HTML registry
//!
//! Most registries publish a paginated listing table linking to one profile
//! page per facility. `HtmlRegistry` covers that shape from configuration:
//! listing rows become work items, profile pages become detail payloads.

use crate::config::SourceConfig;
use crate::fetch::FetchError;
use crate::source::{DetailFetcher, DetailPayload, Discovery, SourceError, WorkItem};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

/// Attribute holding the absolute url of an item's detail page
pub const PROFILE_URL: &str = "profile_url";

/// Compiled selectors for one registry
#[derive(Debug, Clone)]
pub struct RegistrySelectors {
    pub item: Selector,
    pub link: Selector,
    pub id: Option<Selector>,
    pub next_page: Option<Selector>,
    pub listing_fields: Vec<(String, Selector)>,
    pub detail_fields: Vec<(String, Selector)>,
}

impl RegistrySelectors {
    pub fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        Ok(Self {
            item: compile(&config.item_selector)?,
            link: compile(&config.link_selector)?,
            id: config.id_selector.as_deref().map(compile).transpose()?,
            next_page: config.next_page_selector.as_deref().map(compile).transpose()?,
            listing_fields: compile_fields(config.listing_fields.iter())?,
            detail_fields: compile_fields(config.detail_fields.iter())?,
        })
    }
}

fn compile(selector: &str) -> Result<Selector, SourceError> {
    Selector::parse(selector).map_err(|e| SourceError::Selector(format!("'{}': {}", selector, e)))
}

fn compile_fields<'a>(
    fields: impl Iterator<Item = (&'a String, &'a String)>,
) -> Result<Vec<(String, Selector)>, SourceError> {
    fields
        .map(|(name, selector)| Ok((name.clone(), compile(selector)?)))
        .collect()
}

/// Work items found on one listing page
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub items: Vec<WorkItem>,
    pub next_page: Option<Url>,
}

/// Parses a listing page into work items
///
/// Each element matching the item selector becomes one work item if it
/// contains a link to a detail page; rows without one (headers, spacers)
/// are skipped. The id comes from the id selector when configured and
/// non-empty, otherwise it is the resolved profile url.
///
/// # Arguments
///
/// * `html` - The listing page body
/// * `page_url` - Url of the listing page, for resolving relative links
/// * `selectors` - The registry's compiled selectors
pub fn parse_listing(html: &str, page_url: &Url, selectors: &RegistrySelectors) -> ListingPage {
    let document = Html::parse_document(html);
    let mut page = ListingPage::default();

    for row in document.select(&selectors.item) {
        let Some(profile_url) = row
            .select(&selectors.link)
            .next()
            .and_then(|link| link.value().attr("href"))
            .and_then(|href| page_url.join(href.trim()).ok())
        else {
            continue;
        };

        let id = selectors
            .id
            .as_ref()
            .and_then(|selector| first_text(row, selector))
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| profile_url.to_string());

        let mut item = WorkItem::new(id).with_attribute(PROFILE_URL, profile_url.as_str());
        for (name, selector) in &selectors.listing_fields {
            item = item.with_attribute(name.as_str(), first_text(row, selector).unwrap_or_default());
        }
        page.items.push(item);
    }

    page.next_page = selectors.next_page.as_ref().and_then(|selector| {
        document
            .select(selector)
            .next()
            .and_then(|link| link.value().attr("href"))
            .and_then(|href| page_url.join(href.trim()).ok())
    });

    page
}

/// Parses a detail page into a payload
///
/// Every configured detail field gets a column; fields missing on the page
/// are empty. A page where none of the fields match is treated as malformed,
/// which usually means an error page served with status 200.
pub fn parse_detail(html: &str, selectors: &RegistrySelectors) -> Result<DetailPayload, FetchError> {
    let document = Html::parse_document(html);
    let root = document.root_element();
    let mut payload = DetailPayload::new();
    let mut matched = 0;

    for (name, selector) in &selectors.detail_fields {
        let value = first_text(root, selector);
        if value.is_some() {
            matched += 1;
        }
        payload.insert(name.clone(), value.unwrap_or_default());
    }

    if matched == 0 && !selectors.detail_fields.is_empty() {
        return Err(FetchError::Malformed(
            "none of the detail fields matched".to_string(),
        ));
    }

    Ok(payload)
}

/// Text of the first match, whitespace collapsed
fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope.select(selector).next().map(|element| {
        element
            .text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ")
    })
}

/// An HTML registry configured entirely by selectors
pub struct HtmlRegistry {
    client: Client,
    listing_urls: Vec<Url>,
    selectors: RegistrySelectors,
    max_pages: u32,
}

impl HtmlRegistry {
    /// Creates a registry from its configuration and the run's HTTP client
    pub fn from_config(config: &SourceConfig, client: Client) -> Result<Self, SourceError> {
        let listing_urls = config
            .listing_urls
            .iter()
            .map(|raw| {
                Url::parse(raw).map_err(|e| SourceError::InvalidUrl {
                    url: raw.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            client,
            listing_urls,
            selectors: RegistrySelectors::from_config(config)?,
            max_pages: config.max_pages,
        })
    }

    async fn get_listing(&self, url: &Url) -> Result<String, SourceError> {
        let http_error = |source| SourceError::Http {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(http_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(http_error)
    }
}

#[async_trait]
impl Discovery for HtmlRegistry {
    async fn discover(&self) -> Result<Vec<WorkItem>, SourceError> {
        let mut items = Vec::new();
        let mut seen_ids = HashSet::new();
        let mut visited = HashSet::new();

        for start in &self.listing_urls {
            let mut next = Some(start.clone());
            let mut pages = 0;

            while let Some(url) = next.take() {
                if pages >= self.max_pages || !visited.insert(url.clone()) {
                    break;
                }
                pages += 1;

                let body = self.get_listing(&url).await?;
                let page = parse_listing(&body, &url, &self.selectors);
                tracing::debug!(
                    "Listing page {} yielded {} items",
                    url,
                    page.items.len()
                );

                for item in page.items {
                    if seen_ids.insert(item.id.clone()) {
                        items.push(item);
                    }
                }
                next = page.next_page;
            }
        }

        if items.is_empty() {
            let urls: Vec<_> = self.listing_urls.iter().map(Url::as_str).collect();
            return Err(SourceError::Empty(urls.join(", ")));
        }

        tracing::info!("Discovered {} work items", items.len());
        Ok(items)
    }
}

#[async_trait]
impl DetailFetcher for HtmlRegistry {
    async fn fetch_detail(&self, item: &WorkItem) -> Result<DetailPayload, FetchError> {
        let url = item.attribute(PROFILE_URL).ok_or_else(|| {
            FetchError::Malformed(format!("work item {} has no {}", item.id, PROFILE_URL))
        })?;

        let response = self.client.get(url).send().await?;
        let response = check_status(response)?;
        let body = response.text().await?;

        parse_detail(&body, &self.selectors)
    }
}

/// Turns a non-2xx response into a `FetchError::Status`
fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    Err(FetchError::Status {
        code: status.as_u16(),
        retry_after,
    })
}
