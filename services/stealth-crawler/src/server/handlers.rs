//! Route handlers and the API error type

use super::{AppState, SERVICE_NAME};
use crate::error::FetchError;
use crate::report::{with_content_selector, CrawlReport, ScrapeJob, SelectorMap};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<body>
    <h1>Stealth Crawler API</h1>
    <h2>Endpoints:</h2>
    <ul>
        <li><strong>GET /scrape?url=...</strong> - Title scraping</li>
        <li><strong>POST /stealth-scrape</strong> - Stealth scraping with selectors</li>
        <li><strong>POST /batch-scrape</strong> - Batch URL processing</li>
        <li><strong>GET /config</strong> - Crawler configuration</li>
        <li><strong>GET /status</strong> - Crawler status</li>
        <li><strong>GET /health</strong> - Health check</li>
    </ul>
    <h3>Examples:</h3>
    <p>Basic: <a href="/scrape?url=https://www.example.com">/scrape?url=https://www.example.com</a></p>
    <p>Stealth: POST /stealth-scrape with JSON body <code>{"url": "https://www.example.com"}</code></p>
</body>
</html>
"#;

/// Errors returned to API clients as `{"error": "..."}`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Fetch(FetchError),
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        Self::Fetch(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Fetch(FetchError::SubmissionFailed(_) | FetchError::Cancelled) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Fetch(FetchError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            Self::Fetch(FetchError::ProcessingFailed(_) | FetchError::Registry(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::BadRequest(msg) => msg.clone(),
            Self::Fetch(e) => format!("Scraping failed: {}", e),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ScrapeQuery {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
    pub selectors: Option<SelectorMap>,
    /// Per-request wait limit in seconds
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct BatchScrapeRequest {
    pub urls: Vec<String>,
    pub selectors: Option<SelectorMap>,
    /// Per-URL wait limit in seconds
    pub timeout: Option<u64>,
}

fn request_timeout(state: &AppState, override_secs: Option<u64>) -> Duration {
    override_secs
        .map(Duration::from_secs)
        .unwrap_or(state.config.gateway.request_timeout)
}

fn selectors_or_default(state: &AppState, selectors: Option<SelectorMap>) -> SelectorMap {
    selectors.unwrap_or_else(|| state.config.default_selectors.clone())
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}

/// `GET /scrape?url=` - fetch a page's title through the title worker
pub async fn scrape(
    State(state): State<AppState>,
    Query(query): Query<ScrapeQuery>,
) -> Result<Json<Value>, ApiError> {
    let Some(url) = query.url.filter(|u| !u.is_empty()) else {
        return Ok(Json(json!({ "url": "missing", "scrape result": "no results" })));
    };

    let page = state.title_gateway.fetch_default(url.clone()).await?;
    Ok(Json(json!({ "url": url, "scrape result": page })))
}

/// `POST /stealth-scrape` - crawl one URL with selectors
pub async fn stealth_scrape(
    State(state): State<AppState>,
    Json(req): Json<ScrapeRequest>,
) -> Result<Json<Value>, ApiError> {
    let timeout = request_timeout(&state, req.timeout);
    let selectors = req
        .selectors
        .unwrap_or_else(|| with_content_selector(state.config.default_selectors.clone()));
    let job = ScrapeJob::new(req.url, Some(selectors));

    let report = state.stealth_gateway.fetch(job, timeout).await?;
    Ok(Json(json!({ "success": true, "data": report })))
}

/// `POST /batch-scrape` - crawl several URLs concurrently
///
/// A failure for one URL becomes a failed entry in `results`; it does not
/// fail the batch.
pub async fn batch_scrape(
    State(state): State<AppState>,
    Json(req): Json<BatchScrapeRequest>,
) -> Result<Json<Value>, ApiError> {
    let max = state.config.api.max_batch_size;
    if req.urls.len() > max {
        return Err(ApiError::BadRequest(format!(
            "Maximum {} URLs allowed per batch",
            max
        )));
    }

    let timeout = request_timeout(&state, req.timeout);
    let selectors = selectors_or_default(&state, req.selectors);
    info!("Batch scraping {} URLs", req.urls.len());

    let results: Vec<CrawlReport> = join_all(req.urls.iter().map(|url| {
        let job = ScrapeJob::new(url.clone(), Some(selectors.clone()));
        let gateway = &state.stealth_gateway;
        async move {
            match gateway.fetch(job, timeout).await {
                Ok(report) => report,
                Err(e) => {
                    warn!("Batch entry {} failed: {}", url, e);
                    CrawlReport::failed(url.clone(), e.to_string())
                }
            }
        }
    }))
    .await;

    let successful = results.iter().filter(|r| r.is_success()).count();
    Ok(Json(json!({
        "success": true,
        "total_urls": req.urls.len(),
        "successful": successful,
        "failed": req.urls.len() - successful,
        "results": results,
    })))
}

/// `GET /config` - effective crawler settings
pub async fn get_config(State(state): State<AppState>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "delay_range": [config.crawler.delay_range.0, config.crawler.delay_range.1],
        "max_retries": config.crawler.max_retries,
        "timeout": config.crawler.timeout.as_secs_f64(),
        "request_timeout": config.gateway.request_timeout.as_secs_f64(),
        "proxies": config.crawler.proxies.len(),
        "max_batch_size": config.api.max_batch_size,
        "max_concurrency": config.worker.max_concurrency,
        "default_selectors": config.default_selectors,
    }))
}

/// `GET /status` - crawler statistics
pub async fn get_status(State(state): State<AppState>) -> Json<Value> {
    let uptime = chrono::Utc::now() - state.started_at;
    let status = if state.stealth_gateway.worker().is_accepting() {
        "running"
    } else {
        "stopping"
    };
    Json(json!({
        "status": status,
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "visited_urls_count": state.crawler.visited_count(),
        "in_flight_requests": state.in_flight(),
        "queued": {
            "title": state.title_gateway.worker().queued(),
            "stealth": state.stealth_gateway.worker().queued(),
        },
        "started_at": state.started_at.to_rfc3339(),
        "uptime_seconds": uptime.num_seconds(),
    }))
}
