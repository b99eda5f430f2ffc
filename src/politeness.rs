//! # Politeness
//!
//! Everything that keeps the crawler a good citizen towards the sites it visits:
//! a minimum interval between requests to the same domain and robots.txt
//! compliance. Both keep their state in the frontier database so a restarted
//! crawl keeps honouring them.
//!
//! ## Key Components
//!
//! - `PolitenessController`: the single entry point used by crawl workers
//! - `DomainThrottle`: per-domain spacing built on governor rate limiters
//! - `RobotsCache`: robots.txt lookup with a TTL-bounded cache

mod robots;
mod throttle;

pub use robots::RobotsCache;
pub use throttle::DomainThrottle;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::fetch::Fetcher;
use crate::frontier::{FrontierError, FrontierStore};

/// Settings for [`PolitenessController`]
#[derive(Debug, Clone)]
pub struct PolitenessConfig {
    /// Minimum interval between requests to one domain
    pub default_delay: Duration,

    /// Per-domain replacements for `default_delay`, keyed by normalized domain
    pub domain_delays: HashMap<String, Duration>,

    /// How long a fetched robots.txt stays valid
    pub robots_ttl: Duration,

    /// Deadline for fetching robots.txt
    pub robots_timeout: Duration,

    /// Agent token matched against robots.txt groups
    pub robots_agent: String,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            default_delay: Duration::from_secs(1),
            domain_delays: HashMap::new(),
            robots_ttl: Duration::from_secs(86_400),
            robots_timeout: Duration::from_secs(10),
            robots_agent: "scout".to_string(),
        }
    }
}

/// Gatekeeper consulted before every network request
pub struct PolitenessController<F> {
    throttle: DomainThrottle,
    robots: RobotsCache<F>,
}

impl<F: Fetcher> PolitenessController<F> {
    pub fn new(store: FrontierStore, fetcher: Arc<F>, config: PolitenessConfig) -> Self {
        Self {
            throttle: DomainThrottle::new(
                store.clone(),
                config.default_delay,
                config.domain_delays,
            ),
            robots: RobotsCache::new(
                fetcher,
                store,
                config.robots_ttl,
                config.robots_timeout,
                config.robots_agent,
            ),
        }
    }

    /// Block until `domain` may be contacted, then record the request
    ///
    /// Call immediately before each fetch, retries included.
    pub async fn wait_for_domain(&self, domain: &str) -> Result<Duration, FrontierError> {
        self.throttle.wait_for_domain(domain).await
    }

    /// Whether robots.txt permits fetching `url`
    ///
    /// Never fails: an unavailable robots.txt permits everything.
    pub async fn robots_allows(&self, url: &Url) -> bool {
        self.robots.allows(url).await
    }

    /// Delay applied to `domain`
    pub fn delay_for(&self, domain: &str) -> Duration {
        self.throttle.delay_for(domain)
    }
}
