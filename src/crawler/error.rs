//! Error types for the crawler module

use crate::error::Error as CrateError;
use crate::frontier::FrontierError;
use crate::normalize::NormalizeError;
use thiserror::Error;

/// Why a single URL could not be crawled
///
/// All of these are local to one URL; none of them stops the crawl.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Malformed or unresolvable URL, dropped without retrying
    #[error(transparent)]
    InvalidUrl(#[from] NormalizeError),

    /// robots.txt forbids the URL
    #[error("Disallowed by robots.txt: {url}")]
    RobotsDenied { url: String },

    /// Timeouts, transport failures or unexpected statuses on every attempt
    #[error("Giving up on {url} after {attempts} attempts: {reason}")]
    TransientFetch {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// The server answered 404
    #[error("Permanent failure for {url}: HTTP {status}")]
    PermanentFetch { url: String, status: u16 },

    /// Cancelled while waiting to retry
    #[error("Cancelled while retrying {url}")]
    Cancelled { url: String },

    /// HTML parsing error
    #[error("HTML parsing error: {0}")]
    HtmlParse(String),

    /// Durable state operation failed
    #[error("Store error: {0}")]
    Store(#[from] FrontierError),
}

impl From<CrawlError> for CrateError {
    fn from(err: CrawlError) -> Self {
        match err {
            CrawlError::InvalidUrl(e) => e.into(),
            CrawlError::Store(e) => e.into(),
            other => CrateError::Crawl(other.to_string()),
        }
    }
}

/// Settings the crawl cannot start with
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for `CrawlerConfig`
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for CrateError {
    fn from(err: ConfigError) -> Self {
        CrateError::Config(err.to_string())
    }
}
