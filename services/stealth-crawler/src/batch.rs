//! Batch scraping through a gateway, as run by the command-line scraper
//!
//! URLs are fetched through a [`Gateway`] with at most `concurrency` of them
//! in flight; results come back in input order and a failed fetch becomes a
//! failed report for that URL only.

use crate::crawler::CrawlerConfig;
use crate::engine::Engine;
use crate::report::{CrawlReport, ScrapeJob, SelectorMap};
use crate::worker::{Gateway, WorkerConfig};
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::{info, warn};

/// Headroom on top of the computed crawl budget
const BUDGET_SLACK: Duration = Duration::from_secs(5);

/// Longest a single crawl can take with `config`
///
/// One pre-crawl delay, then every attempt may run to the request timeout
/// and back off for up to the maximum delay.
pub fn crawl_budget(config: &CrawlerConfig) -> Duration {
    let max_delay = Duration::try_from_secs_f64(config.delay_range.1).unwrap_or(Duration::ZERO);
    let attempts = config.max_retries.max(1);
    max_delay + (config.timeout + max_delay) * attempts + BUDGET_SLACK
}

/// How long the batch waits for one URL: the configured request timeout,
/// raised to the crawl budget when retries or timeouts make crawls longer
pub fn batch_timeout(crawler: &CrawlerConfig, request_timeout: Duration) -> Duration {
    request_timeout.max(crawl_budget(crawler))
}

/// Worker settings for a batch of `url_count` URLs
///
/// Every URL is submitted once, so a queue of `url_count` never rejects.
/// The worker may run as many items as the queue holds: a crawl whose caller
/// timed out keeps running and must not hold up the next URL. The number of
/// URLs the batch waits on at once is capped by [`scrape_all`].
pub fn batch_worker_config(url_count: usize, concurrency: usize, shutdown_grace: Duration) -> WorkerConfig {
    let slots = url_count.max(concurrency).max(1);
    WorkerConfig::builder()
        .queue_capacity(slots)
        .max_concurrency(slots)
        .shutdown_grace(shutdown_grace)
        .build()
}

/// Scrape `urls` with `selectors`, at most `concurrency` at a time
pub async fn scrape_all<E>(
    gateway: &Gateway<E>,
    urls: Vec<String>,
    selectors: &SelectorMap,
    concurrency: usize,
) -> Vec<CrawlReport>
where
    E: Engine<Payload = ScrapeJob, Output = CrawlReport>,
{
    let total = urls.len();

    stream::iter(urls.into_iter().enumerate())
        .map(|(i, url)| {
            let job = ScrapeJob::new(url.clone(), Some(selectors.clone()));
            async move {
                info!("Processing {}/{}: {}", i + 1, total, url);
                let report = match gateway.fetch_default(job).await {
                    Ok(report) => report,
                    Err(e) => CrawlReport::failed(url.clone(), e.to_string()),
                };
                if report.is_success() {
                    info!("✓ Successfully scraped: {}", url);
                } else {
                    warn!("✗ Failed to scrape: {}", url);
                }
                report
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}
