//! # Crawl Scheduler
//!
//! This module drives a crawl: it seeds the frontier, hands queued URLs to
//! concurrent tasks, and decides when to stop. Each task applies politeness,
//! fetches with retries, follows in-scope links and saves qualifying pages.
//!
//! ## Key Components
//!
//! - `CrawlerConfig`: Configuration for the crawl, with a builder and JSON loading
//! - `Crawler`: The controller running the `Idle -> Running -> Draining -> Stopped` lifecycle
//! - `CrawlStats`: Aggregate counters, published while the crawl runs
//! - `CrawlError`: Why an individual URL failed
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scout::crawler::{Crawler, CrawlerConfig};
//! use scout::fetch::HttpFetcher;
//! use scout::frontier::FrontierStore;
//! use scout::sink::{CsvSink, ProductPageClassifier};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CrawlerConfig::builder()
//!     .seeds(["https://shop.example/"])
//!     .allowed_domains(["shop.example"])
//!     .keywords(["laptop"])
//!     .max_urls(100)
//!     .build();
//!
//! let store = FrontierStore::new_from_path("crawler_queue.db").await?;
//! let fetcher = Arc::new(HttpFetcher::new(&config.user_agent)?);
//! let sink = Arc::new(CsvSink::open("collected_urls.csv", config.id_prefix.clone())?);
//! let classifier = Arc::new(ProductPageClassifier::new()?);
//!
//! let crawler = Crawler::new(config, store, fetcher, sink, classifier)?;
//! let summary = crawler.run(CancellationToken::new()).await?;
//! println!("{}: {}", summary.stop_reason, summary.stats);
//! # Ok(())
//! # }
//! ```

mod config;
mod controller;
mod error;
mod links;
mod stats;
mod worker;

pub use config::{CrawlerConfig, CrawlerConfigBuilder};
pub use controller::{CrawlState, CrawlSummary, Crawler, StopReason};
pub use error::{ConfigError, CrawlError};
pub use links::LinkExtractor;
pub use stats::CrawlStats;
