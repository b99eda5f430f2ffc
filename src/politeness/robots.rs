//! robots.txt cache backed by the frontier database

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use robotstxt::DefaultMatcher;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::fetch::Fetcher;
use crate::frontier::{FrontierStore, RobotsRow, now_millis};
use crate::normalize::domain_of;

/// Decides whether URLs may be fetched according to their site's robots.txt
///
/// Rules are looked up in memory, then in the database, and only then fetched
/// from `<origin>/robots.txt`. A missing or unreachable robots.txt is cached as
/// an empty body, which permits everything.
pub struct RobotsCache<F> {
    fetcher: Arc<F>,
    store: FrontierStore,
    ttl: Duration,
    timeout: Duration,
    agent: String,
    /// One slot per domain so concurrent lookups for a domain fetch only once
    entries: DashMap<String, Arc<Mutex<Option<RobotsRow>>>>,
}

impl<F: Fetcher> RobotsCache<F> {
    pub fn new(
        fetcher: Arc<F>,
        store: FrontierStore,
        ttl: Duration,
        timeout: Duration,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            store,
            ttl,
            timeout,
            agent: agent.into(),
            entries: DashMap::new(),
        }
    }

    /// Whether the crawler's agent may fetch `url`
    #[instrument(skip(self), fields(url = %url))]
    pub async fn allows(&self, url: &Url) -> bool {
        let Some(domain) = domain_of(url) else {
            return true;
        };

        let rules = self.rules_for(&domain, url).await;
        let mut matcher = DefaultMatcher::default();
        let allowed = matcher.one_agent_allowed_by_robots(&rules, &self.agent, url.as_str());
        if !allowed {
            debug!(domain, "Disallowed by robots.txt");
        }
        allowed
    }

    async fn rules_for(&self, domain: &str, url: &Url) -> String {
        let slot = self
            .entries
            .entry(domain.to_string())
            .or_default()
            .value()
            .clone();
        let mut cached = slot.lock().await;

        if let Some(row) = cached.as_ref() {
            if self.is_fresh(row) {
                return row.rules.clone();
            }
        } else {
            match self.store.robots_rules(domain).await {
                Ok(Some(row)) if self.is_fresh(&row) => {
                    let rules = row.rules.clone();
                    *cached = Some(row);
                    return rules;
                }
                Ok(_) => {}
                Err(e) => warn!(domain, error = %e, "Failed to read cached robots.txt"),
            }
        }

        let row = RobotsRow {
            rules: self.download(url).await,
            fetched_at: now_millis(),
        };
        if let Err(e) = self
            .store
            .store_robots(domain, &row.rules, row.fetched_at)
            .await
        {
            warn!(domain, error = %e, "Failed to persist robots.txt");
        }

        let rules = row.rules.clone();
        *cached = Some(row);
        rules
    }

    /// Body of the origin's robots.txt, or empty when there is none to honour
    async fn download(&self, url: &Url) -> String {
        let robots_url = match url.join("/robots.txt") {
            Ok(robots_url) => robots_url,
            Err(e) => {
                warn!(error = %e, "Cannot build robots.txt URL");
                return String::new();
            }
        };

        match self.fetcher.fetch(&robots_url, self.timeout).await {
            Ok(response) if response.is_success() => {
                debug!(url = %robots_url, bytes = response.body.len(), "Fetched robots.txt");
                response.body
            }
            Ok(response) => {
                debug!(url = %robots_url, status = response.status, "No robots.txt");
                String::new()
            }
            Err(e) => {
                warn!(url = %robots_url, error = %e, "robots.txt unreachable, allowing all");
                String::new()
            }
        }
    }

    fn is_fresh(&self, row: &RobotsRow) -> bool {
        let age_ms = now_millis().saturating_sub(row.fetched_at);
        age_ms >= 0 && (age_ms as u128) < self.ttl.as_millis()
    }
}
