//! HTTP API
//!
//! Two workers back the API: a lightweight title crawler for `GET /scrape`
//! and the stealth crawler for the scrape/batch endpoints. Handlers only
//! talk to their gateway; the workers live as long as the server.

mod handlers;

pub use handlers::{ApiError, BatchScrapeRequest, ScrapeQuery, ScrapeRequest};

use crate::config::AppConfig;
use crate::crawler::StealthCrawler;
use crate::engine::{StealthEngine, TitleEngine};
use crate::error::{CrawlerError, Result};
use crate::worker::Gateway;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const SERVICE_NAME: &str = "stealth-crawler-api";

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub title_gateway: Gateway<TitleEngine>,
    pub stealth_gateway: Gateway<StealthEngine>,
    pub crawler: Arc<StealthCrawler>,
    pub config: Arc<AppConfig>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Start both workers. Must be called inside a tokio runtime.
    pub fn start(config: AppConfig) -> Result<Self> {
        let crawler = Arc::new(StealthCrawler::with_config(config.crawler.clone())?);
        let timeout = config.gateway.request_timeout;

        let title_gateway = Gateway::start(
            TitleEngine::new(config.crawler.clone())?,
            config.worker.clone(),
            timeout,
        );
        let stealth_gateway = Gateway::start(
            StealthEngine::new(Arc::clone(&crawler)),
            config.worker.clone(),
            timeout,
        );

        Ok(Self {
            title_gateway,
            stealth_gateway,
            crawler,
            config: Arc::new(config),
            started_at: Utc::now(),
        })
    }

    /// Stop both workers; requests still waiting get `Cancelled`
    pub async fn shutdown(&self) {
        tokio::join!(self.title_gateway.shutdown(), self.stealth_gateway.shutdown());
    }

    /// Requests currently holding a result slot, across both workers
    pub fn in_flight(&self) -> usize {
        self.title_gateway.registry().len() + self.stealth_gateway.registry().len()
    }
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/scrape", get(handlers::scrape))
        .route("/stealth-scrape", post(handlers::stealth_scrape))
        .route("/batch-scrape", post(handlers::batch_scrape))
        .route("/config", get(handlers::get_config))
        .route("/status", get(handlers::get_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the API until Ctrl+C / SIGTERM, then shut the workers down
pub async fn serve(config: AppConfig) -> Result<()> {
    let bind = config.server.bind.clone();
    let state = AppState::start(config)?;

    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|e| CrawlerError::ServerError(format!("failed to bind {}: {}", bind, e)))?;
    info!("Starting {} on http://{}", SERVICE_NAME, bind);

    let served = axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("HTTP server stopped, shutting down workers...");
    state.shutdown().await;

    served.map_err(|e| CrawlerError::ServerError(e.to_string()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating shutdown..."),
    }
}
