//! Application configuration
//!
//! Layered with figment, lowest to highest priority:
//! 1. Built-in defaults
//! 2. Config file: `--config <path>` or `./stealth-crawler.toml` if present
//!    (`.json` files are read as JSON, everything else as TOML)
//! 3. Environment: `STEALTH_CRAWLER_<SECTION>__<KEY>`, e.g.
//!    `STEALTH_CRAWLER_CRAWLER__MAX_RETRIES=5`

use crate::crawler::CrawlerConfig;
use crate::error::{CrawlerError, Result};
use crate::report::{default_selectors, SelectorMap};
use crate::worker::config::duration_secs;
use crate::worker::WorkerConfig;
use figment::providers::{Env, Format, Json, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "stealth-crawler.toml";
pub const ENV_PREFIX: &str = "STEALTH_CRAWLER_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API listens on
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// How long a request waits for its result
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Maximum URLs accepted by one batch request
    pub max_batch_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { max_batch_size: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub crawler: CrawlerConfig,
    pub worker: WorkerConfig,
    pub gateway: GatewayConfig,
    pub api: ApiConfig,
    pub default_selectors: SelectorMap,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            crawler: CrawlerConfig::default(),
            worker: WorkerConfig::default(),
            gateway: GatewayConfig::default(),
            api: ApiConfig::default(),
            default_selectors: default_selectors(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        let file = match path {
            Some(path) if !path.exists() => {
                return Err(CrawlerError::ConfigError(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            Some(path) => Some(path.to_path_buf()),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                default.exists().then_some(default)
            }
        };

        if let Some(file) = file {
            tracing::debug!("Loading config from {}", file.display());
            figment = match file.extension().and_then(|ext| ext.to_str()) {
                Some("json") => figment.merge(Json::file(file)),
                _ => figment.merge(Toml::file(file)),
            };
        }

        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| CrawlerError::ConfigError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.crawler.validate()?;
        if self.worker.max_concurrency == 0 {
            return Err(CrawlerError::ConfigError(
                "worker.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.worker.queue_capacity == 0 {
            return Err(CrawlerError::ConfigError(
                "worker.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.api.max_batch_size == 0 {
            return Err(CrawlerError::ConfigError(
                "api.max_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
