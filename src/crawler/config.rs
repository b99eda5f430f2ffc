//! # Crawler Configuration Module
//!
//! Static settings for one crawl: where to start, what is in scope, how hard
//! to push each site and when to stop. Values come from `Default`, a JSON file
//! or the fluent builder, and are checked once by [`CrawlerConfig::validate`]
//! before a crawl starts.
//!
//! ## Key Components
//!
//! - `CrawlerConfig`: The main configuration struct with crawler parameters
//! - `CrawlerConfigBuilder`: Builder pattern implementation for easier configuration

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crawler::error::ConfigError;
use crate::fetch::RetryPolicy;
use crate::normalize::normalize_domain;
use crate::politeness::PolitenessConfig;

/// Configuration for the crawler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// URLs enqueued at depth 0 when the crawl starts
    pub seeds: Vec<String>,

    /// Domains links may point to, compared without `www.`
    pub allowed_domains: Vec<String>,

    /// A link must contain one of these, case-insensitively
    pub keywords: Vec<String>,

    /// Stop after this many pages were saved in this run
    pub max_urls: u64,

    /// Pages fetched concurrently
    pub max_concurrent_tasks: usize,

    /// Minimum seconds between two requests to one domain
    pub per_domain_delay_secs: f64,

    /// Per-domain replacements for `per_domain_delay_secs`
    pub domain_delays: HashMap<String, f64>,

    /// Deadline for one page request
    pub request_timeout_secs: f64,

    /// Retries after the first attempt of a page fetch
    pub max_retries: u32,

    /// Wait before the first retry, doubled for each further retry
    pub retry_base_delay_secs: f64,

    /// How long a fetched robots.txt is trusted
    pub robots_ttl_secs: u64,

    /// Deadline for fetching robots.txt
    pub robots_timeout_secs: f64,

    /// User-Agent header sent with every request
    pub user_agent: String,

    /// Product token matched against robots.txt groups
    pub robots_agent: String,

    /// Links deeper than this are not enqueued
    pub max_depth: Option<u32>,

    /// Pause before polling an empty frontier while pages are still in flight
    pub idle_backoff_ms: u64,

    /// Log progress every this many processed URLs
    pub progress_every: u64,

    /// Prefix of the ids written to the output file
    pub id_prefix: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            allowed_domains: Vec::new(),
            keywords: Vec::new(),
            max_urls: 1000,
            max_concurrent_tasks: 50,
            per_domain_delay_secs: 1.0,
            domain_delays: HashMap::new(),
            request_timeout_secs: 30.0,
            max_retries: 3,
            retry_base_delay_secs: 1.0,
            robots_ttl_secs: 86_400,
            robots_timeout_secs: 10.0,
            user_agent: format!(
                "Mozilla/5.0 (compatible; scout/{})",
                env!("CARGO_PKG_VERSION")
            ),
            robots_agent: "scout".to_string(),
            max_depth: None,
            idle_backoff_ms: 100,
            progress_every: 100,
            id_prefix: "07".to_string(),
        }
    }
}

/// Builder for CrawlerConfig
#[derive(Debug, Default)]
pub struct CrawlerConfigBuilder {
    config: CrawlerConfig,
}

impl CrawlerConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: CrawlerConfig::default(),
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: CrawlerConfig) -> Self {
        Self { config }
    }

    pub fn seeds<I, S>(mut self, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.seeds = seeds.into_iter().map(Into::into).collect();
        self
    }

    pub fn allowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Set the save quota
    pub fn max_urls(mut self, max_urls: u64) -> Self {
        self.config.max_urls = max_urls;
        self
    }

    /// Set the number of pages fetched concurrently
    pub fn max_concurrent_tasks(mut self, max_concurrent_tasks: usize) -> Self {
        self.config.max_concurrent_tasks = max_concurrent_tasks;
        self
    }

    /// Set the default per-domain delay in seconds
    pub fn per_domain_delay_secs(mut self, secs: f64) -> Self {
        self.config.per_domain_delay_secs = secs;
        self
    }

    /// Override the delay for one domain
    pub fn domain_delay(mut self, domain: impl Into<String>, secs: f64) -> Self {
        self.config.domain_delays.insert(domain.into(), secs);
        self
    }

    /// Set the page request deadline in seconds
    pub fn request_timeout_secs(mut self, secs: f64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn retry_base_delay_secs(mut self, secs: f64) -> Self {
        self.config.retry_base_delay_secs = secs;
        self
    }

    pub fn robots_ttl_secs(mut self, secs: u64) -> Self {
        self.config.robots_ttl_secs = secs;
        self
    }

    pub fn robots_timeout_secs(mut self, secs: f64) -> Self {
        self.config.robots_timeout_secs = secs;
        self
    }

    /// Set the user agent to use for requests
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn robots_agent(mut self, robots_agent: impl Into<String>) -> Self {
        self.config.robots_agent = robots_agent.into();
        self
    }

    /// Set the maximum depth to crawl
    pub fn max_depth(mut self, max_depth: Option<u32>) -> Self {
        self.config.max_depth = max_depth;
        self
    }

    pub fn idle_backoff_ms(mut self, ms: u64) -> Self {
        self.config.idle_backoff_ms = ms;
        self
    }

    pub fn progress_every(mut self, every: u64) -> Self {
        self.config.progress_every = every;
        self
    }

    pub fn id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.id_prefix = prefix.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> CrawlerConfig {
        self.config
    }
}

impl CrawlerConfig {
    /// Create a new builder
    pub fn builder() -> CrawlerConfigBuilder {
        CrawlerConfigBuilder::new()
    }

    /// Load a JSON configuration file; absent fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Reject settings the crawl cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.max_urls == 0 {
            return Err(ConfigError::Invalid("max_urls must be at least 1".to_string()));
        }
        if self.allowed_domains.iter().all(|d| d.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "at least one allowed domain is required".to_string(),
            ));
        }
        if self.progress_every == 0 {
            return Err(ConfigError::Invalid("progress_every must be at least 1".to_string()));
        }

        check_seconds("per_domain_delay_secs", self.per_domain_delay_secs, true)?;
        check_seconds("request_timeout_secs", self.request_timeout_secs, false)?;
        check_seconds("retry_base_delay_secs", self.retry_base_delay_secs, true)?;
        check_seconds("robots_timeout_secs", self.robots_timeout_secs, false)?;
        for (domain, secs) in &self.domain_delays {
            check_seconds(&format!("domain_delays[{}]", domain), *secs, true)?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        seconds(self.request_timeout_secs)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, seconds(self.retry_base_delay_secs))
    }

    /// Politeness settings with override domains normalized like crawled URLs
    pub fn politeness(&self) -> PolitenessConfig {
        PolitenessConfig {
            default_delay: seconds(self.per_domain_delay_secs),
            domain_delays: self
                .domain_delays
                .iter()
                .map(|(domain, secs)| (normalize_domain(domain), seconds(*secs)))
                .collect(),
            robots_ttl: Duration::from_secs(self.robots_ttl_secs),
            robots_timeout: seconds(self.robots_timeout_secs),
            robots_agent: self.robots_agent.clone(),
        }
    }
}

fn check_seconds(name: &str, value: f64, zero_ok: bool) -> Result<(), ConfigError> {
    let valid = value.is_finite() && (value > 0.0 || (zero_ok && value == 0.0));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{} must be a {} number of seconds, got {}",
            name,
            if zero_ok { "non-negative" } else { "positive" },
            value
        )))
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn valid() -> CrawlerConfigBuilder {
        CrawlerConfig::builder()
            .seeds(["https://a.test/"])
            .allowed_domains(["a.test"])
            .keywords(["x"])
    }

    #[test]
    fn test_defaults() {
        let config = CrawlerConfig::default();
        assert_eq!(config.max_concurrent_tasks, 50);
        assert_eq!(config.per_domain_delay_secs, 1.0);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_policy().base_delay, Duration::from_secs(1));
        assert_eq!(config.politeness().robots_ttl, Duration::from_secs(86_400));
        assert_eq!(config.id_prefix, "07");
    }

    #[test]
    fn test_builder_and_validation() {
        let config = valid().max_urls(3).max_concurrent_tasks(4).build();
        assert!(config.validate().is_ok());

        assert!(valid().max_concurrent_tasks(0).build().validate().is_err());
        assert!(valid().max_urls(0).build().validate().is_err());
        assert!(valid().per_domain_delay_secs(-1.0).build().validate().is_err());
        assert!(valid().per_domain_delay_secs(f64::NAN).build().validate().is_err());
        assert!(valid().request_timeout_secs(0.0).build().validate().is_err());
        assert!(valid().domain_delay("a.test", f64::INFINITY).build().validate().is_err());
        assert!(
            valid()
                .allowed_domains(Vec::<String>::new())
                .build()
                .validate()
                .is_err()
        );

        // zero delay disables spacing but is allowed
        assert!(valid().per_domain_delay_secs(0.0).build().validate().is_ok());
    }

    #[test]
    fn test_politeness_overrides_are_normalized() {
        let config = valid().domain_delay("WWW.Shop.test", 2.5).build();
        let politeness = config.politeness();
        assert_eq!(
            politeness.domain_delays.get("shop.test"),
            Some(&Duration::from_millis(2500))
        );
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("crawl.json");
        std::fs::write(
            &path,
            r#"{"seeds": ["https://a.test/"], "allowed_domains": ["a.test"], "keywords": ["x"], "max_urls": 5}"#,
        )
        .unwrap();

        let config = CrawlerConfig::from_file(&path).unwrap();
        assert_eq!(config.max_urls, 5);
        assert_eq!(config.max_concurrent_tasks, 50);
        assert!(config.validate().is_ok());

        assert!(matches!(
            CrawlerConfig::from_file(temp_dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
