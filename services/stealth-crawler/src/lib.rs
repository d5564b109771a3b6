//! Stealth Crawler - an HTTP scraping service built on a request/result
//! correlation worker
//!
//! Request handlers never crawl directly. Each handler hands its URL to a
//! long-lived background worker through a [`Gateway`], which registers a
//! result slot, queues the work item and waits (with a timeout) for exactly
//! that item's result. The worker drives an [`Engine`] with bounded
//! concurrency and routes each completion back to its slot.
//!
//! Two engines ship with the crate:
//! - [`TitleEngine`] - fetches a page and extracts its `<title>`
//! - [`StealthEngine`] - runs the [`StealthCrawler`] with a selector map
//!
//! # Example
//! ```ignore
//! use stealth_crawler::{CrawlerConfig, Gateway, TitleEngine, WorkerConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = TitleEngine::new(CrawlerConfig::default())?;
//!     let gateway = Gateway::start(engine, WorkerConfig::default(), Duration::from_secs(30));
//!
//!     let page = gateway.fetch_default("https://example.com".to_string()).await?;
//!     println!("{}", page.title);
//!
//!     gateway.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod crawler;
pub mod engine;
pub mod error;
pub mod output;
pub mod report;
pub mod server;
pub mod worker;

pub use config::AppConfig;
pub use crawler::{CrawlerConfig, StealthCrawler};
pub use engine::{Engine, StealthEngine, TitleEngine};
pub use error::{CrawlerError, FetchError, Result, SlotError, SubmitError};
pub use report::{default_selectors, CrawlReport, CrawlStatus, PageTitle, ScrapeJob, SelectorMap};
pub use worker::{Gateway, SlotRegistry, WorkItem, Worker, WorkerConfig};
