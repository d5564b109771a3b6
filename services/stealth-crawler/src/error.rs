//! Error types for stealth-crawler

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the fetch/extract collaborators and the surrounding service
#[derive(Error, Debug)]
pub enum CrawlerError {
    #[error("Failed to fetch URL: {url}")]
    FetchError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for URL: {url}")]
    HttpStatusError { url: String, status: u16 },

    #[error("Failed to fetch URL after {attempts} attempts: {url} (last error: {last_error})")]
    RetryExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid proxy {proxy}: {reason}")]
    InvalidProxy { proxy: String, reason: String },

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("File system error")]
    FsError(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, CrawlerError>;

/// Registry-level failures. These indicate misuse or races, not caller errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("request {0} is already registered")]
    DuplicateIdentifier(Uuid),

    #[error("request {0} is not registered")]
    UnknownIdentifier(Uuid),

    #[error("request {0} was already resolved")]
    AlreadyResolved(Uuid),

    #[error("request {0} already has a waiter")]
    AlreadyAwaited(Uuid),

    #[error("request {0} was cancelled")]
    Cancelled(Uuid),
}

/// Why the worker refused a work item
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("worker queue is closed")]
    QueueClosed,

    #[error("worker queue is full")]
    QueueFull,
}

/// Outcome of a failed gateway fetch, as seen by the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("submission failed: {0}")]
    SubmissionFailed(#[from] SubmitError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("processing failed: {0}")]
    ProcessingFailed(String),

    #[error("registry error: {0}")]
    Registry(SlotError),
}

impl FetchError {
    /// Whether the caller may reasonably try the same request again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SubmissionFailed(_) | Self::Timeout(_))
    }
}

impl From<SlotError> for FetchError {
    fn from(err: SlotError) -> Self {
        match err {
            SlotError::Cancelled(_) => Self::Cancelled,
            other => Self::Registry(other),
        }
    }
}
