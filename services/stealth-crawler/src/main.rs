//! Stealth Crawler CLI
//!
//! Runs the scraping API (`serve`) or scrapes URLs directly from the command
//! line (`scrape`, `fetch`).

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use stealth_crawler::output::{self, OutputFormat};
use stealth_crawler::report::cli_default_selectors;
use stealth_crawler::{batch, server, AppConfig, Gateway, StealthCrawler, StealthEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stealth-crawler")]
#[command(about = "Stealth web scraper and scraping API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true, env = "STEALTH_CRAWLER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP scraping API
    Serve {
        /// Address to listen on (overrides server.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Scrape one URL or a file of URLs
    #[command(group(ArgGroup::new("input").required(true).args(["url", "file"])))]
    Scrape {
        /// Single URL to scrape
        #[arg(short, long)]
        url: Option<String>,

        /// File containing URLs (one per line)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output file path (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Delay range in seconds
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
        delay: Option<Vec<f64>>,

        /// Max attempts per URL
        #[arg(long)]
        retries: Option<u32>,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Proxy server (can be used multiple times)
        #[arg(long = "proxy")]
        proxies: Vec<String>,

        /// JSON file with custom CSS selectors
        #[arg(long)]
        selectors: Option<PathBuf>,

        /// Disable random delays (not recommended)
        #[arg(long)]
        no_delay: bool,

        /// Number of URLs scraped at once
        #[arg(long, default_value = "1")]
        concurrency: usize,
    },

    /// Fetch the raw HTML of a URL
    Fetch {
        /// URL to fetch
        #[arg(short, long)]
        url: String,

        /// Output file path (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging; RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            server::serve(config).await?;
        }

        Commands::Scrape {
            url,
            file,
            output,
            format,
            delay,
            retries,
            timeout,
            proxies,
            selectors,
            no_delay,
            concurrency,
        } => {
            // Apply crawler overrides
            if let Some(delay) = delay {
                if let &[min, max] = delay.as_slice() {
                    config.crawler.delay_range = (min, max);
                }
            }
            if no_delay {
                config.crawler.delay_range = (0.0, 0.0);
            }
            if let Some(retries) = retries {
                config.crawler.max_retries = retries;
            }
            if let Some(timeout) = timeout {
                config.crawler.timeout = Duration::from_secs(timeout);
            }
            if !proxies.is_empty() {
                config.crawler.proxies = proxies;
            }
            config.validate()?;

            // Prepare URLs
            let urls = match (url, file) {
                (Some(url), _) => {
                    if !output::is_valid_url(&url) {
                        bail!("Invalid URL: {}", url);
                    }
                    vec![url]
                }
                (None, Some(file)) => {
                    let urls = output::load_urls(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    if urls.is_empty() {
                        bail!("No valid URLs found in {}", file.display());
                    }
                    urls
                }
                (None, None) => bail!("Either --url or --file is required"),
            };

            output::check_destination(format, output.as_deref())?;

            // Load custom selectors if provided
            let mut selector_map = cli_default_selectors();
            if let Some(path) = selectors {
                let custom = output::load_selectors(&path)
                    .with_context(|| format!("Error loading selectors from {}", path.display()))?;
                selector_map.extend(custom);
            }

            let crawler = Arc::new(StealthCrawler::with_config(config.crawler.clone())?);
            let timeout = batch::batch_timeout(&config.crawler, config.gateway.request_timeout);
            let gateway = Gateway::start(
                StealthEngine::new(crawler),
                batch::batch_worker_config(urls.len(), concurrency, config.worker.shutdown_grace),
                timeout,
            );

            info!("Starting to scrape {} URLs...", urls.len());
            let total = urls.len();

            let results = tokio::select! {
                results = batch::scrape_all(&gateway, urls, &selector_map, concurrency) => results,
                _ = tokio::signal::ctrl_c() => {
                    info!("Scraping interrupted by user");
                    gateway.shutdown().await;
                    return Ok(());
                }
            };
            gateway.shutdown().await;

            // Output results
            let rendered = output::render(&results, format)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    info!("Results saved to {}", path.display());
                }
                None => println!("{}", rendered),
            }

            let successful = results.iter().filter(|r| r.is_success()).count();
            info!("Scraping completed: {}/{} successful", successful, total);
        }

        Commands::Fetch { url, output } => {
            if !output::is_valid_url(&url) {
                bail!("Invalid URL: {}", url);
            }

            let crawler = StealthCrawler::with_config(config.crawler)?;
            let html = crawler.fetch_raw_html(&url).await?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &html)?;
                    info!("Written {} bytes to {}", html.len(), path.display());
                }
                None => println!("{}", html),
            }
        }
    }

    Ok(())
}
