//! Aggregate crawl counters

use std::fmt;
use std::ops::AddAssign;

use serde::Serialize;
use tracing::info;

/// Counters for one crawl run
///
/// The controller owns the running totals; workers build a fresh value for the
/// URL they handled and the controller adds it in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    /// URLs admitted to the frontier, seeds included
    pub queued: u64,

    /// Claimed URLs that reached a terminal state
    pub processed: u64,

    /// Pages handed to the sink
    pub saved: u64,

    /// URLs marked failed for any reason other than robots.txt
    pub failed: u64,

    /// URLs refused by robots.txt
    pub robots_denied: u64,

    /// Enqueue attempts for URLs already in the frontier
    pub duplicates: u64,
}

impl AddAssign for CrawlStats {
    fn add_assign(&mut self, delta: Self) {
        self.queued += delta.queued;
        self.processed += delta.processed;
        self.saved += delta.saved;
        self.failed += delta.failed;
        self.robots_denied += delta.robots_denied;
        self.duplicates += delta.duplicates;
    }
}

impl CrawlStats {
    /// Emit the totals as counter fields for the metrics layer
    pub fn record_metrics(&self) {
        info!(
            monotonic_counter.crawl_queued = self.queued,
            monotonic_counter.crawl_processed = self.processed,
            monotonic_counter.crawl_saved = self.saved,
            monotonic_counter.crawl_failed = self.failed,
            monotonic_counter.crawl_robots_denied = self.robots_denied,
            monotonic_counter.crawl_duplicates = self.duplicates,
            "Crawl counters"
        );
    }
}

impl fmt::Display for CrawlStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queued={} processed={} saved={} failed={} robots_denied={} duplicates={}",
            self.queued,
            self.processed,
            self.saved,
            self.failed,
            self.robots_denied,
            self.duplicates
        )
    }
}
