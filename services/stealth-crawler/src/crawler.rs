//! Stealth crawler for fetching pages and extracting fields
//!
//! Every request carries a browser-like header set and a randomly chosen
//! user agent. Requests are spaced with random delays and retried a bounded
//! number of times, optionally through a randomly chosen proxy.

use crate::error::{CrawlerError, Result};
use crate::report::{CrawlReport, SelectorMap};
use crate::worker::config::duration_secs;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Proxy};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

/// User agents rotated across requests
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.1; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36 Edg/119.0.0.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1",
];

const SEARCH_REFERER: &str = "https://www.google.com/";

/// Back-off range used by `fetch_raw_html` after a failed attempt
const RAW_FAILURE_BACKOFF: (f64, f64) = (3.0, 8.0);

/// Configuration for the stealth crawler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Random delay bounds in seconds, applied before crawls and between retries
    pub delay_range: (f64, f64),
    /// Number of attempts per URL (default: 3)
    pub max_retries: u32,
    /// Request timeout (default: 30 seconds)
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Connection timeout (default: 10 seconds)
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Proxy URLs; one is picked at random per attempt. Empty means direct.
    pub proxies: Vec<String>,
    /// Maximum number of links included in a report (default: 20)
    pub max_links: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            delay_range: (1.0, 3.0),
            max_retries: 3,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            proxies: Vec::new(),
            max_links: 20,
        }
    }
}

impl CrawlerConfig {
    /// Same settings with all random delays disabled
    pub fn without_delays(mut self) -> Self {
        self.delay_range = (0.0, 0.0);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let (min, max) = self.delay_range;
        if !(min >= 0.0 && max >= min && max.is_finite()) {
            return Err(CrawlerError::ConfigError(format!(
                "invalid delay range [{}, {}]",
                min, max
            )));
        }
        if self.max_retries == 0 {
            return Err(CrawlerError::ConfigError(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Browser-like headers sent with every request
fn stealth_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
    headers.insert(
        "sec-ch-ua",
        HeaderValue::from_static(r#""Google Chrome";v="119", "Chromium";v="119", "Not?A_Brand";v="24""#),
    );
    headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
    headers.insert("sec-ch-ua-platform", HeaderValue::from_static(r#""macOS""#));
    headers
}

/// Pick a user agent from the catalogue
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Pick a uniformly random duration within `range` (seconds)
fn pick_delay(range: (f64, f64)) -> Duration {
    let (min, max) = range;
    if max <= 0.0 {
        return Duration::ZERO;
    }
    let secs = if max > min {
        rand::thread_rng().gen_range(min..=max)
    } else {
        min
    };
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// Whether a failed status is worth another attempt
fn is_retryable_status(status: u16) -> bool {
    !(400..500).contains(&status) || matches!(status, 403 | 408 | 429)
}

/// Stealth crawler for fetching and extracting web pages
pub struct StealthCrawler {
    /// One client per proxy, or a single direct client
    clients: Vec<Client>,
    config: CrawlerConfig,
    visited: Mutex<HashSet<String>>,
}

impl StealthCrawler {
    /// Create a new crawler instance with custom configuration
    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        config.validate()?;

        let clients = if config.proxies.is_empty() {
            vec![Self::build_client(&config, None)?]
        } else {
            config
                .proxies
                .iter()
                .map(|proxy| Self::build_client(&config, Some(proxy)))
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self {
            clients,
            config,
            visited: Mutex::new(HashSet::new()),
        })
    }

    fn build_client(config: &CrawlerConfig, proxy: Option<&str>) -> Result<Client> {
        let mut builder = Client::builder()
            .default_headers(stealth_headers())
            .cookie_store(true)
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout);

        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy).map_err(|e| CrawlerError::InvalidProxy {
                proxy: proxy.to_string(),
                reason: e.to_string(),
            })?;
            builder = builder.proxy(proxy);
        }

        builder.build().map_err(|e| CrawlerError::FetchError {
            url: "client_init".to_string(),
            source: e,
        })
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    fn client(&self) -> &Client {
        if self.clients.len() == 1 {
            return &self.clients[0];
        }
        self.clients
            .choose(&mut rand::thread_rng())
            .unwrap_or(&self.clients[0])
    }

    async fn random_delay(&self) {
        let delay = pick_delay(self.config.delay_range);
        if !delay.is_zero() {
            debug!("Sleeping {:?}", delay);
            sleep(delay).await;
        }
    }

    /// Number of distinct URLs fetched successfully
    pub fn visited_count(&self) -> usize {
        self.visited
            .lock()
            .map(|visited| visited.len())
            .unwrap_or_default()
    }

    fn mark_visited(&self, url: &str) {
        if let Ok(mut visited) = self.visited.lock() {
            visited.insert(url.to_string());
        }
    }

    /// Fetch a URL and return the HTML content with retry support
    pub async fn fetch_page(&self, url: &str) -> Result<String> {
        info!("Fetching URL: {}", url);
        let attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.fetch_once(url, None).await {
                Ok(html) => {
                    if attempt > 1 {
                        info!("Successfully fetched {} on attempt {}", url, attempt);
                    }
                    self.mark_visited(url);
                    return Ok(html);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!("Attempt {} failed for {}: {}", attempt, url, last_error);

                    if let CrawlerError::HttpStatusError { status, .. } = &e {
                        if !is_retryable_status(*status) {
                            return Err(e);
                        }
                    }
                    if attempt < attempts {
                        self.random_delay().await;
                    }
                }
            }
        }

        Err(CrawlerError::RetryExhausted {
            url: url.to_string(),
            attempts,
            last_error,
        })
    }

    /// Fetch raw HTML with a search-engine referer and longer back-off on failure
    pub async fn fetch_raw_html(&self, url: &str) -> Result<String> {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();

        // Scale the failure back-off down to nothing when delays are disabled
        let backoff = if self.config.delay_range.1 <= 0.0 {
            (0.0, 0.0)
        } else {
            RAW_FAILURE_BACKOFF
        };

        for attempt in 1..=attempts {
            self.random_delay().await;

            match self.fetch_once(url, Some(SEARCH_REFERER)).await {
                Ok(html) => {
                    self.mark_visited(url);
                    return Ok(html);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!("Attempt {} failed for {}: {}", attempt, url, last_error);
                    if let CrawlerError::HttpStatusError { status, .. } = &e {
                        match status {
                            403 => warn!("Access forbidden - likely bot detection"),
                            503 => warn!("Service unavailable - rate limited"),
                            _ => {}
                        }
                    }
                    if attempt < attempts {
                        let delay = pick_delay(backoff);
                        if !delay.is_zero() {
                            sleep(delay).await;
                        }
                    }
                }
            }
        }

        Err(CrawlerError::RetryExhausted {
            url: url.to_string(),
            attempts,
            last_error,
        })
    }

    /// Single fetch attempt without retry
    async fn fetch_once(&self, url: &str, referer: Option<&str>) -> Result<String> {
        let mut request = self
            .client()
            .get(url)
            .header(header::USER_AGENT, random_user_agent());
        if let Some(referer) = referer {
            request = request.header(header::REFERER, referer);
        }

        let response = request.send().await.map_err(|e| CrawlerError::FetchError {
            url: url.to_string(),
            source: e,
        })?;

        let status = response.status();
        debug!("Response status {} for {}", status, url);
        if !status.is_success() {
            return Err(CrawlerError::HttpStatusError {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| CrawlerError::FetchError {
                url: url.to_string(),
                source: e,
            })?;

        debug!("Fetched {} bytes from {}", html.len(), url);
        Ok(html)
    }

    /// Fetch and extract a URL in one step
    ///
    /// Fetch failures are reported in the returned report rather than as an
    /// error, so batch callers can keep going.
    pub async fn crawl(&self, url: &str, selectors: &SelectorMap) -> CrawlReport {
        let base = match Url::parse(url) {
            Ok(base) => base,
            Err(_) => return CrawlReport::failed(url, CrawlerError::InvalidUrl(url.to_string()).to_string()),
        };

        self.random_delay().await;

        let html = match self.fetch_page(url).await {
            Ok(html) => html,
            Err(e) => {
                warn!("Failed to fetch {}: {}", url, e);
                return CrawlReport::failed(url, format!("Failed to fetch page: {}", e));
            }
        };

        let data = extract_data(&html, selectors);
        let mut links = extract_links(&html, &base);
        links.truncate(self.config.max_links);

        CrawlReport::success(url, data, links)
    }
}

/// Extract one text value per selector from an HTML document
///
/// Returns the trimmed text of the first match, or its `content` attribute
/// for `<meta>` elements. Missing matches, XPath expressions and invalid CSS
/// all yield an empty string.
pub fn extract_data(html: &str, selectors: &SelectorMap) -> BTreeMap<String, String> {
    let document = Html::parse_document(html);

    selectors
        .iter()
        .map(|(key, css)| {
            let value = if css.starts_with("//") {
                debug!("Skipping XPath selector for {}: {}", key, css);
                String::new()
            } else {
                match Selector::parse(css) {
                    Ok(selector) => document
                        .select(&selector)
                        .next()
                        .map(|el| {
                            if el.value().name() == "meta" {
                                el.value().attr("content").unwrap_or_default().trim().to_string()
                            } else {
                                el.text().collect::<String>().trim().to_string()
                            }
                        })
                        .unwrap_or_default(),
                    Err(e) => {
                        warn!("Error extracting {} with selector {}: {:?}", key, css, e);
                        String::new()
                    }
                }
            };
            (key.clone(), value)
        })
        .collect()
}

/// Absolute links found in `<a href>` elements, resolved against `base`
pub fn extract_links(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .filter(|link| link.host_str().is_some())
        .map(|link| link.to_string())
        .collect()
}

/// Text of the document's `<title>`, empty when absent
pub fn extract_title(html: &str) -> String {
    let document = Html::parse_document(html);
    Selector::parse("title")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_default()
}
