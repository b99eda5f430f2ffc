//! Processing of one claimed URL

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use scraper::Html;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::crawler::error::CrawlError;
use crate::crawler::links::LinkExtractor;
use crate::crawler::stats::CrawlStats;
use crate::fetch::{Attempt, FetchResponse, Fetcher, RetryPolicy};
use crate::filter::LinkFilter;
use crate::frontier::{ClaimedUrl, EnqueueOutcome, FrontierStatus, FrontierStore};
use crate::normalize::{NormalizeError, domain_of, normalize};
use crate::politeness::PolitenessController;
use crate::sink::{PageClassifier, PageSink};

/// Everything a crawl task needs, shared by all tasks of a run
pub(crate) struct PageWorker<F, S> {
    pub(crate) store: FrontierStore,
    pub(crate) politeness: PolitenessController<F>,
    pub(crate) fetcher: Arc<F>,
    pub(crate) sink: Arc<S>,
    pub(crate) classifier: Arc<dyn PageClassifier>,
    pub(crate) filter: LinkFilter,
    pub(crate) links: LinkExtractor,
    pub(crate) retry: RetryPolicy,
    pub(crate) request_timeout: Duration,
    pub(crate) max_depth: Option<u32>,
    pub(crate) quota: SaveQuota,
}

/// Saves still allowed in a run
///
/// A save holds a permit while the sink works; only a successful save uses it
/// up. Once `limit` saves have succeeded the semaphore is closed and every
/// waiting task gives up.
pub(crate) struct SaveQuota {
    limit: u64,
    permits: Semaphore,
    saved: AtomicU64,
}

impl SaveQuota {
    pub(crate) fn new(limit: u64) -> Self {
        let permits = usize::try_from(limit)
            .unwrap_or(usize::MAX)
            .min(Semaphore::MAX_PERMITS);
        let quota = Self {
            limit,
            permits: Semaphore::new(permits),
            saved: AtomicU64::new(0),
        };
        if limit == 0 {
            quota.permits.close();
        }
        quota
    }

    /// Completed saves so far
    pub(crate) fn saved(&self) -> u64 {
        self.saved.load(Ordering::Acquire)
    }

    pub(crate) fn reached(&self) -> bool {
        self.saved() >= self.limit
    }

    /// Wait for a save slot; `None` once the quota has been reached
    async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        self.permits.acquire().await.ok()
    }

    fn record_save(&self, permit: SemaphorePermit<'_>) {
        permit.forget();
        if self.saved.fetch_add(1, Ordering::AcqRel) + 1 >= self.limit {
            self.permits.close();
        }
    }
}

/// What a fetched page contributed
#[derive(Debug, Default)]
struct PageOutcome {
    saved_as: Option<String>,
}

impl<F: Fetcher, S: PageSink> PageWorker<F, S> {
    /// Take a claimed URL to a terminal state and report the counter changes
    ///
    /// `cancel` is only observed between fetch attempts; a started request is
    /// allowed to finish.
    #[instrument(skip_all, fields(url = %claimed.url, depth = claimed.depth))]
    pub(crate) async fn crawl(
        self: Arc<Self>,
        claimed: ClaimedUrl,
        cancel: CancellationToken,
    ) -> CrawlStats {
        let mut stats = CrawlStats::default();
        let result = self.visit(&claimed, &cancel, &mut stats).await;

        let status = match &result {
            Ok(outcome) => {
                match &outcome.saved_as {
                    Some(id) => info!(%id, "Crawled and saved"),
                    None => info!("Crawled"),
                }
                FrontierStatus::Completed
            }
            Err(CrawlError::RobotsDenied { .. }) => {
                info!("Skipped, disallowed by robots.txt");
                stats.robots_denied += 1;
                FrontierStatus::Failed
            }
            Err(err @ CrawlError::Store(_)) => {
                error!(error = %err, "Store error while crawling");
                stats.failed += 1;
                FrontierStatus::Failed
            }
            Err(err) => {
                warn!(error = %err, "Crawl failed");
                stats.failed += 1;
                FrontierStatus::Failed
            }
        };

        match self.store.mark_terminal(&claimed.url, status).await {
            Ok(()) => stats.processed += 1,
            Err(e) => error!(error = %e, %status, "Failed to record terminal status"),
        }
        stats
    }

    async fn visit(
        &self,
        claimed: &ClaimedUrl,
        cancel: &CancellationToken,
        stats: &mut CrawlStats,
    ) -> Result<PageOutcome, CrawlError> {
        let url = normalize(&claimed.url, None)?;
        let domain = domain_of(&url).ok_or_else(|| NormalizeError::InvalidUrl {
            url: claimed.url.clone(),
            reason: "missing host".to_string(),
        })?;

        if !self.politeness.robots_allows(&url).await {
            return Err(CrawlError::RobotsDenied {
                url: claimed.url.clone(),
            });
        }

        let response = self.fetch_with_retries(&url, &domain, cancel).await?;

        // Html is not Send, so it must be gone before the next await
        let (links, savable) = {
            let document = Html::parse_document(&response.body);
            (
                self.links.extract(&document, &url),
                self.classifier.is_savable(&document, &url),
            )
        };

        self.enqueue_links(links, claimed.depth + 1, stats).await?;

        let mut outcome = PageOutcome::default();
        if savable {
            outcome.saved_as = self.save(&url, stats).await;
        }
        Ok(outcome)
    }

    async fn fetch_with_retries(
        &self,
        url: &Url,
        domain: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, CrawlError> {
        let max_attempts = self.retry.max_attempts();
        let mut last_reason = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let backoff = self.retry.backoff(attempt - 2);
                debug!(attempt, backoff_ms = backoff.as_millis() as u64, "Backing off");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(CrawlError::Cancelled { url: url.to_string() });
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            self.politeness.wait_for_domain(domain).await?;
            let result = self.fetcher.fetch(url, self.request_timeout).await;

            match RetryPolicy::classify(result) {
                Attempt::Success(response) => return Ok(response),
                Attempt::Permanent { status } => {
                    return Err(CrawlError::PermanentFetch {
                        url: url.to_string(),
                        status,
                    });
                }
                Attempt::Retryable(reason) => {
                    warn!(attempt, max_attempts, %reason, "Fetch attempt failed");
                    last_reason = reason;
                }
            }
        }

        Err(CrawlError::TransientFetch {
            url: url.to_string(),
            attempts: max_attempts,
            reason: last_reason,
        })
    }

    async fn enqueue_links(
        &self,
        links: Vec<Url>,
        depth: u32,
        stats: &mut CrawlStats,
    ) -> Result<(), CrawlError> {
        if self.max_depth.is_some_and(|max_depth| depth > max_depth) {
            debug!(depth, found = links.len(), "Depth limit reached, not following links");
            return Ok(());
        }

        for link in links.iter().filter(|link| self.filter.in_scope(link)) {
            match self.store.enqueue(link, depth).await? {
                EnqueueOutcome::Inserted => {
                    debug!(link = %link, depth, "Enqueued");
                    stats.queued += 1;
                }
                EnqueueOutcome::AlreadyExists => stats.duplicates += 1,
            }
        }
        Ok(())
    }

    /// Hand the page to the sink if the save quota allows
    async fn save(&self, url: &Url, stats: &mut CrawlStats) -> Option<String> {
        let Some(permit) = self.quota.acquire().await else {
            debug!("Save quota exhausted, not saving");
            return None;
        };

        match self.sink.save(url).await {
            Ok(id) => {
                self.quota.record_save(permit);
                stats.saved += 1;
                Some(id)
            }
            Err(e) => {
                warn!(error = %e, "Failed to save page");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchError, FetchResponse};
    use crate::politeness::PolitenessConfig;
    use crate::testing::{FakeFetcher, MemorySink};
    use tempfile::tempdir;

    struct Setup {
        worker: Arc<PageWorker<FakeFetcher, MemorySink>>,
        fetcher: Arc<FakeFetcher>,
        sink: Arc<MemorySink>,
        store: FrontierStore,
        _temp_dir: tempfile::TempDir,
    }

    async fn setup(fetcher: FakeFetcher, max_depth: Option<u32>, quota: u64) -> Setup {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("worker.db").to_string_lossy().to_string();
        let store = FrontierStore::new_from_path(&db_path).await.unwrap();
        let fetcher = Arc::new(fetcher);
        let sink = Arc::new(MemorySink::default());
        let politeness = PolitenessController::new(
            store.clone(),
            fetcher.clone(),
            PolitenessConfig {
                default_delay: Duration::ZERO,
                ..PolitenessConfig::default()
            },
        );

        let worker = Arc::new(PageWorker {
            store: store.clone(),
            politeness,
            fetcher: fetcher.clone(),
            sink: sink.clone(),
            classifier: Arc::new(|_: &Html, url: &Url| url.path().starts_with("/x")),
            filter: LinkFilter::new(["a.test"], ["x"]),
            links: LinkExtractor::new().unwrap(),
            retry: RetryPolicy::new(3, Duration::from_millis(10)),
            request_timeout: Duration::from_secs(5),
            max_depth,
            quota: SaveQuota::new(quota),
        });

        Setup {
            worker,
            fetcher,
            sink,
            store,
            _temp_dir: temp_dir,
        }
    }

    async fn claim(store: &FrontierStore, raw: &str) -> ClaimedUrl {
        store.enqueue(&Url::parse(raw).unwrap(), 0).await.unwrap();
        store.claim_next().await.unwrap().unwrap()
    }

    async fn status_of(store: &FrontierStore, url: &str) -> FrontierStatus {
        store.get_entry(url).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_robots_denial_skips_content_fetch() {
        let fetcher = FakeFetcher::new()
            .page("https://x.com/robots.txt", "User-agent: *\nDisallow: /private/\n")
            .page("https://x.com/private/item", "<a href='/x1'>x</a>");
        let s = setup(fetcher, None, 10).await;
        let claimed = claim(&s.store, "https://x.com/private/item").await;

        let stats = s.worker.clone().crawl(claimed, CancellationToken::new()).await;

        assert_eq!(s.fetcher.count("https://x.com/private/item"), 0);
        assert_eq!(stats.robots_denied, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.processed, 1);
        assert_eq!(status_of(&s.store, "https://x.com/private/item").await, FrontierStatus::Failed);
    }

    #[tokio::test]
    async fn test_timeouts_are_retried_then_failed() {
        let fetcher = FakeFetcher::new().route("https://a.test/x1", Err(FetchError::Timeout));
        let s = setup(fetcher, None, 10).await;
        let claimed = claim(&s.store, "https://a.test/x1").await;

        let stats = s.worker.clone().crawl(claimed, CancellationToken::new()).await;

        assert_eq!(s.fetcher.count("https://a.test/x1"), 4);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.robots_denied, 0);
        assert_eq!(status_of(&s.store, "https://a.test/x1").await, FrontierStatus::Failed);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let fetcher = FakeFetcher::new()
            .route("https://a.test/x1", Ok(FetchResponse::new(503, "busy")));
        let s = setup(fetcher, None, 10).await;
        let claimed = claim(&s.store, "https://a.test/x1").await;

        s.worker.clone().crawl(claimed, CancellationToken::new()).await;

        assert_eq!(s.fetcher.count("https://a.test/x1"), 4);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let s = setup(FakeFetcher::new(), None, 10).await;
        let claimed = claim(&s.store, "https://a.test/x1").await;

        let stats = s.worker.clone().crawl(claimed, CancellationToken::new()).await;

        assert_eq!(s.fetcher.count("https://a.test/x1"), 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(status_of(&s.store, "https://a.test/x1").await, FrontierStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancellation_stops_retrying() {
        let fetcher = FakeFetcher::new().route(
            "https://a.test/x1",
            Err(FetchError::Transport("connection reset".to_string())),
        );
        let s = setup(fetcher, None, 10).await;
        let claimed = claim(&s.store, "https://a.test/x1").await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = s.worker.clone().crawl(claimed, cancel).await;

        assert_eq!(s.fetcher.count("https://a.test/x1"), 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(status_of(&s.store, "https://a.test/x1").await, FrontierStatus::Failed);
    }

    #[tokio::test]
    async fn test_page_links_are_filtered_and_enqueued() {
        let fetcher = FakeFetcher::new().page(
            "https://a.test/x1",
            r#"<a href="/x2">in scope</a>
               <a href="/y1">no keyword</a>
               <a href="https://b.test/x3">other domain</a>
               <a href="/x1">itself</a>"#,
        );
        let s = setup(fetcher, None, 10).await;
        let claimed = claim(&s.store, "https://a.test/x1").await;

        let stats = s.worker.clone().crawl(claimed, CancellationToken::new()).await;

        assert_eq!(stats.queued, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.saved, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(s.sink.saved(), vec!["https://a.test/x1".to_string()]);

        let x2 = s.store.get_entry("https://a.test/x2").await.unwrap().unwrap();
        assert_eq!(x2.depth, 1);
        assert_eq!(x2.status, FrontierStatus::Queued);
        assert!(s.store.get_entry("https://a.test/y1").await.unwrap().is_none());
        assert!(s.store.get_entry("https://b.test/x3").await.unwrap().is_none());
        assert_eq!(status_of(&s.store, "https://a.test/x1").await, FrontierStatus::Completed);
    }

    #[tokio::test]
    async fn test_depth_cap_stops_link_following() {
        let fetcher = FakeFetcher::new().page("https://a.test/x1", r#"<a href="/x2">deeper</a>"#);
        let s = setup(fetcher, Some(0), 10).await;
        let claimed = claim(&s.store, "https://a.test/x1").await;

        let stats = s.worker.clone().crawl(claimed, CancellationToken::new()).await;

        assert_eq!(stats.queued, 0);
        assert!(s.store.get_entry("https://a.test/x2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exhausted_quota_skips_save() {
        let fetcher = FakeFetcher::new().page("https://a.test/x1", "<p>product</p>");
        let s = setup(fetcher, None, 0).await;
        let claimed = claim(&s.store, "https://a.test/x1").await;

        let stats = s.worker.clone().crawl(claimed, CancellationToken::new()).await;

        assert_eq!(stats.saved, 0);
        assert!(s.sink.saved().is_empty());
        assert_eq!(status_of(&s.store, "https://a.test/x1").await, FrontierStatus::Completed);
    }

    #[tokio::test]
    async fn test_failed_save_gives_its_slot_back() {
        let quota = SaveQuota::new(1);

        let permit = quota.acquire().await.unwrap();
        drop(permit);
        assert!(!quota.reached());

        let permit = quota.acquire().await.unwrap();
        quota.record_save(permit);
        assert!(quota.reached());
        assert_eq!(quota.saved(), 1);
        assert!(quota.acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_zero_quota_never_grants_a_slot() {
        let quota = SaveQuota::new(0);
        assert!(quota.reached());
        assert!(quota.acquire().await.is_none());
    }
}
