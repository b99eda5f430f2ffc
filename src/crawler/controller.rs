//! Crawl lifecycle: seeding, dispatch, stop conditions and draining

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::crawler::config::CrawlerConfig;
use crate::crawler::links::LinkExtractor;
use crate::crawler::stats::CrawlStats;
use crate::crawler::worker::{PageWorker, SaveQuota};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::filter::LinkFilter;
use crate::frontier::{EnqueueOutcome, FrontierError, FrontierStore};
use crate::normalize::normalize;
use crate::politeness::PolitenessController;
use crate::sink::{PageClassifier, PageSink};

/// Consecutive failed claims after which the store is considered gone
const MAX_CLAIM_FAILURES: u32 = 3;

/// Lifecycle of a crawl; only ever moves forward one step at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CrawlState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl CrawlState {
    fn next(self) -> Option<Self> {
        match self {
            CrawlState::Idle => Some(CrawlState::Running),
            CrawlState::Running => Some(CrawlState::Draining),
            CrawlState::Draining => Some(CrawlState::Stopped),
            CrawlState::Stopped => None,
        }
    }
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CrawlState::Idle => "idle",
            CrawlState::Running => "running",
            CrawlState::Draining => "draining",
            CrawlState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why a crawl stopped dispatching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// The save quota was used up
    QuotaReached,
    /// No queued URLs left and nothing in flight
    FrontierExhausted,
    /// The shutdown token was cancelled
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            StopReason::QuotaReached => "save quota reached",
            StopReason::FrontierExhausted => "frontier exhausted",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(reason)
    }
}

/// Result of a finished crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub stop_reason: StopReason,
    pub stats: CrawlStats,
}

enum Exit {
    Stop(StopReason),
    StoreUnavailable(FrontierError),
}

/// Runs one crawl over a frontier store
///
/// The crawler claims queued URLs and runs each in its own task, never more
/// than `max_concurrent_tasks` at once. Counters live here; tasks return their
/// contribution when they finish.
pub struct Crawler<F: Fetcher, S: PageSink> {
    config: CrawlerConfig,
    store: FrontierStore,
    worker: Arc<PageWorker<F, S>>,
    state: watch::Sender<CrawlState>,
    stats: watch::Sender<CrawlStats>,
}

impl<F: Fetcher, S: PageSink> Crawler<F, S> {
    /// Validate `config` and wire the crawl's collaborators together
    pub fn new(
        config: CrawlerConfig,
        store: FrontierStore,
        fetcher: Arc<F>,
        sink: Arc<S>,
        classifier: Arc<dyn PageClassifier>,
    ) -> Result<Self> {
        config.validate()?;

        let worker = PageWorker {
            store: store.clone(),
            politeness: PolitenessController::new(
                store.clone(),
                fetcher.clone(),
                config.politeness(),
            ),
            fetcher,
            sink,
            classifier,
            filter: LinkFilter::new(&config.allowed_domains, &config.keywords),
            links: LinkExtractor::new()?,
            retry: config.retry_policy(),
            request_timeout: config.request_timeout(),
            max_depth: config.max_depth,
            quota: SaveQuota::new(config.max_urls),
        };

        let (state, _) = watch::channel(CrawlState::Idle);
        let (stats, _) = watch::channel(CrawlStats::default());

        Ok(Self {
            config,
            store,
            worker: Arc::new(worker),
            state,
            stats,
        })
    }

    pub fn state(&self) -> CrawlState {
        *self.state.borrow()
    }

    /// Follow state changes
    pub fn subscribe_state(&self) -> watch::Receiver<CrawlState> {
        self.state.subscribe()
    }

    /// Follow the running counters, updated whenever a URL finishes
    pub fn subscribe_stats(&self) -> watch::Receiver<CrawlStats> {
        self.stats.subscribe()
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Crawl until the quota is reached, the frontier runs dry or `shutdown` is cancelled
    ///
    /// Always passes through `Draining`: URLs already claimed are finished
    /// before this returns. Fails with [`Error::StoreUnavailable`] when the
    /// store stops answering claims.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<CrawlSummary> {
        self.advance(CrawlState::Running)?;

        let mut totals = CrawlStats::default();
        self.seed(&mut totals).await;
        self.stats.send_replace(totals);
        info!(
            seeds = self.config.seeds.len(),
            queued = totals.queued,
            concurrency = self.config.max_concurrent_tasks,
            quota = self.config.max_urls,
            "Crawl started"
        );

        let mut tasks = JoinSet::new();
        let exit = self.dispatch(&mut tasks, &mut totals, &shutdown).await;

        self.advance(CrawlState::Draining)?;
        info!(in_flight = tasks.len(), "Draining in-flight URLs");
        while let Some(joined) = tasks.join_next().await {
            self.absorb(&mut totals, joined);
        }

        self.advance(CrawlState::Stopped)?;
        totals.record_metrics();

        match exit {
            Exit::Stop(stop_reason) => {
                info!(reason = %stop_reason, stats = %totals, "Crawl finished");
                Ok(CrawlSummary {
                    stop_reason,
                    stats: totals,
                })
            }
            Exit::StoreUnavailable(e) => {
                error!(error = %e, stats = %totals, "Crawl aborted, store unavailable");
                Err(Error::StoreUnavailable(e.to_string()))
            }
        }
    }

    /// Normalize and enqueue the seeds at depth 0, bypassing the link filter
    async fn seed(&self, totals: &mut CrawlStats) {
        for raw in &self.config.seeds {
            let url = match normalize(raw, None) {
                Ok(url) => url,
                Err(e) => {
                    warn!(seed = %raw, error = %e, "Skipping invalid seed");
                    continue;
                }
            };

            match self.store.enqueue(&url, 0).await {
                Ok(EnqueueOutcome::Inserted) => totals.queued += 1,
                Ok(EnqueueOutcome::AlreadyExists) => {
                    debug!(seed = %url, "Seed already in frontier");
                    totals.duplicates += 1;
                }
                Err(e) => error!(seed = %url, error = %e, "Failed to enqueue seed"),
            }
        }
    }

    async fn dispatch(
        &self,
        tasks: &mut JoinSet<CrawlStats>,
        totals: &mut CrawlStats,
        shutdown: &CancellationToken,
    ) -> Exit {
        let idle_backoff = self.config.idle_backoff();
        let mut claim_failures = 0;

        loop {
            if shutdown.is_cancelled() {
                return Exit::Stop(StopReason::Cancelled);
            }
            if self.quota_reached(totals) {
                return Exit::Stop(StopReason::QuotaReached);
            }

            let has_capacity = tasks.len() < self.config.max_concurrent_tasks;
            if has_capacity {
                match self.store.claim_next().await {
                    Ok(Some(claimed)) => {
                        claim_failures = 0;
                        debug!(url = %claimed.url, depth = claimed.depth, "Dispatching");
                        let worker = self.worker.clone();
                        tasks.spawn(worker.crawl(claimed, shutdown.child_token()));
                        continue;
                    }
                    Ok(None) => {
                        claim_failures = 0;
                        if tasks.is_empty() {
                            return Exit::Stop(StopReason::FrontierExhausted);
                        }
                    }
                    Err(e) => {
                        claim_failures += 1;
                        error!(error = %e, attempt = claim_failures, "Failed to claim next URL");
                        if claim_failures >= MAX_CLAIM_FAILURES {
                            return Exit::StoreUnavailable(e);
                        }
                    }
                }
            }

            // Pool full or frontier momentarily empty: wait for a task to finish
            tokio::select! {
                Some(joined) = tasks.join_next() => self.absorb(totals, joined),
                _ = tokio::time::sleep(idle_backoff), if has_capacity => {}
                _ = shutdown.cancelled() => {}
            }
        }
    }

    fn quota_reached(&self, totals: &CrawlStats) -> bool {
        totals.saved >= self.config.max_urls || self.worker.quota.reached()
    }

    fn absorb(&self, totals: &mut CrawlStats, joined: std::result::Result<CrawlStats, JoinError>) {
        let delta = match joined {
            Ok(delta) => delta,
            Err(e) => {
                error!(error = %e, "Crawl task panicked");
                return;
            }
        };

        let every = self.config.progress_every.max(1);
        let before = totals.processed / every;
        *totals += delta;
        if totals.processed / every > before {
            info!(
                processed = totals.processed,
                saved = totals.saved,
                queued = totals.queued,
                failed = totals.failed,
                "Progress"
            );
        }
        self.stats.send_replace(*totals);
    }

    fn advance(&self, to: CrawlState) -> Result<()> {
        let from = self.state();
        if from.next() != Some(to) {
            return Err(Error::Crawl(format!(
                "invalid crawl state transition {} -> {}",
                from, to
            )));
        }
        self.state.send_replace(to);
        debug!(%from, %to, "Crawl state changed");
        Ok(())
    }
}
