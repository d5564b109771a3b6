//! Processing engines driven by the worker loop

use crate::crawler::{extract_title, CrawlerConfig, StealthCrawler};
use crate::error::Result;
use crate::report::{CrawlReport, PageTitle, ScrapeJob};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Something that turns a payload into an output, one item at a time
///
/// The worker owns queueing, concurrency and completion routing; an engine
/// only processes. An `Err` (or a panic) resolves the caller's slot with an
/// error payload.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    type Payload: Send + 'static;
    type Output: Send + 'static;

    /// Short name used in logs
    fn name(&self) -> &str;

    async fn process(&self, payload: Self::Payload) -> Result<Self::Output>;
}

/// Fetches a page and extracts its `<title>`
pub struct TitleEngine {
    crawler: StealthCrawler,
}

impl TitleEngine {
    /// Title crawls skip the stealth delays; retries and timeouts still apply
    pub fn new(config: CrawlerConfig) -> Result<Self> {
        Ok(Self {
            crawler: StealthCrawler::with_config(config.without_delays())?,
        })
    }
}

#[async_trait]
impl Engine for TitleEngine {
    type Payload = String;
    type Output = PageTitle;

    fn name(&self) -> &str {
        "title"
    }

    async fn process(&self, url: String) -> Result<PageTitle> {
        info!("Processing {} ...", url);
        let html = self.crawler.fetch_page(&url).await?;
        Ok(PageTitle {
            title: extract_title(&html),
        })
    }
}

/// Runs a full stealth crawl with the job's selectors
pub struct StealthEngine {
    crawler: Arc<StealthCrawler>,
}

impl StealthEngine {
    pub fn new(crawler: Arc<StealthCrawler>) -> Self {
        Self { crawler }
    }

    pub fn crawler(&self) -> &Arc<StealthCrawler> {
        &self.crawler
    }
}

#[async_trait]
impl Engine for StealthEngine {
    type Payload = ScrapeJob;
    type Output = CrawlReport;

    fn name(&self) -> &str {
        "stealth"
    }

    async fn process(&self, job: ScrapeJob) -> Result<CrawlReport> {
        Ok(self.crawler.crawl(&job.url, &job.selectors).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrawlerError;
    use crate::report::CrawlStatus;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> CrawlerConfig {
        CrawlerConfig {
            max_retries: 1,
            timeout: Duration::from_secs(5),
            ..CrawlerConfig::default()
        }
        .without_delays()
    }

    #[tokio::test]
    async fn title_engine_extracts_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<title>Crawlee</title><p>hi</p>"),
            )
            .mount(&server)
            .await;

        let engine = TitleEngine::new(CrawlerConfig::default()).unwrap();
        let title = engine.process(server.uri()).await.unwrap();
        assert_eq!(title.title, "Crawlee");
    }

    #[tokio::test]
    async fn title_engine_surfaces_fetch_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let engine = TitleEngine::new(config()).unwrap();
        let result = engine.process(server.uri()).await;
        assert!(matches!(
            result,
            Err(CrawlerError::HttpStatusError { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn stealth_engine_reports_instead_of_failing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let crawler = Arc::new(StealthCrawler::with_config(config()).unwrap());
        let engine = StealthEngine::new(crawler);
        let report = engine
            .process(ScrapeJob::new(server.uri(), None))
            .await
            .unwrap();
        assert_eq!(report.status, CrawlStatus::Failed);
    }
}
