//! # Scout - Polite, Resumable Web Crawl Scheduler
//!
//! This crate collects product and article URLs from a bounded set of domains
//! while staying polite to the sites it visits. Crawl state lives in a local
//! libsql database, so an interrupted crawl can be resumed where it stopped.
//!
//! ## Features
//!
//! - Canonical URL keys with idempotent normalization
//! - Durable frontier with at-most-once admission and breadth-first claiming
//! - Per-domain request spacing and cached robots.txt compliance
//! - Bounded concurrent fetching with exponential-backoff retries
//! - Keyword and domain scoped link discovery
//! - Save quota, graceful cancellation and a final counter summary
//! - Append-only CSV output for the downstream extraction stage
//!
//! ## Modules
//!
//! - `normalize`: URL canonicalization
//! - `frontier`: the durable store of URLs, politeness timestamps and robots.txt bodies
//! - `politeness`: per-domain throttle and robots.txt cache
//! - `fetch`: the `Fetcher` abstraction, its reqwest implementation and retry policy
//! - `filter`: scope check for discovered links
//! - `sink`: savable-page predicate and output writers
//! - `crawler`: configuration, workers and the crawl controller

mod error;
pub mod crawler;
pub mod fetch;
pub mod filter;
pub mod frontier;
pub mod normalize;
pub mod politeness;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

/// Commonly used types
pub mod prelude {
    pub use crate::crawler::{CrawlState, CrawlStats, CrawlSummary, Crawler, CrawlerConfig, StopReason};
    pub use crate::error::{Error, Result};
    pub use crate::fetch::{Fetcher, HttpFetcher};
    pub use crate::frontier::{FrontierStatus, FrontierStore};
    pub use crate::sink::{CsvSink, PageClassifier, PageSink, ProductPageClassifier};
}
