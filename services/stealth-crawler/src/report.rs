//! Data types produced by the crawlers and returned by the API

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Map of output field name to CSS selector
pub type SelectorMap = BTreeMap<String, String>;

/// Selectors used when a request does not supply its own
pub fn default_selectors() -> SelectorMap {
    [
        ("title", "title"),
        ("description", "meta[name=\"description\"]"),
        ("h1", "h1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Selector for the main body text of a page
pub const CONTENT_SELECTOR: &str = "p, div.content, main, article";

/// `selectors` plus a `content` field, unless one is already set
///
/// Single-page stealth scrapes also pull the main text; batches keep the
/// lighter default set.
pub fn with_content_selector(mut selectors: SelectorMap) -> SelectorMap {
    selectors
        .entry("content".to_string())
        .or_insert_with(|| CONTENT_SELECTOR.to_string());
    selectors
}

/// Broader selector set used by the command-line scraper
pub fn cli_default_selectors() -> SelectorMap {
    let mut selectors = default_selectors();
    selectors.insert("keywords".to_string(), "meta[name=\"keywords\"]".to_string());
    selectors.insert("h2".to_string(), "h2".to_string());
    selectors
}

/// Work submitted to the stealth engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub url: String,
    pub selectors: SelectorMap,
}

impl ScrapeJob {
    pub fn new(url: impl Into<String>, selectors: Option<SelectorMap>) -> Self {
        Self {
            url: url.into(),
            selectors: selectors.unwrap_or_else(default_selectors),
        }
    }
}

/// Result of the lightweight title crawl
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTitle {
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStatus {
    Success,
    Failed,
}

impl std::fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrawlStatus::Success => write!(f, "success"),
            CrawlStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of crawling one URL with the stealth crawler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlReport {
    pub url: String,
    pub status: CrawlStatus,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CrawlReport {
    pub fn success(url: impl Into<String>, data: BTreeMap<String, String>, links: Vec<String>) -> Self {
        Self {
            url: url.into(),
            status: CrawlStatus::Success,
            data,
            links,
            error: None,
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: CrawlStatus::Failed,
            data: BTreeMap::new(),
            links: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CrawlStatus::Success
    }
}
