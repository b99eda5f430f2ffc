//! Error types for the scout crate

use thiserror::Error;

/// Result type for scout operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for scout operations
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration, fatal to the whole run
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL could not be normalized
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Durable state operation failed
    #[error("Store error: {0}")]
    Store(String),

    /// The store stopped answering and the crawl was shut down
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Web crawling error
    #[error("Crawl error: {0}")]
    Crawl(String),

    /// Output sink error
    #[error("Sink error: {0}")]
    Sink(String),
}
