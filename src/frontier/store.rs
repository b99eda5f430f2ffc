//! Database operations for the frontier store

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use libsql::{Connection, Row, Value, params};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::frontier::error::FrontierError;
use crate::frontier::schema;
use crate::frontier::{
    ClaimedUrl, DomainDelayRow, EnqueueOutcome, FrontierCounts, FrontierEntry, FrontierStatus,
    RobotsRow, now_millis,
};
use crate::normalize::normalize;

/// Durable crawl state backed by LibSQL
///
/// Every statement runs while holding the connection lock, and each mutation is
/// a single autocommitted statement, so it is on disk before the call returns
/// and no two callers can interleave on the same row.
#[derive(Clone)]
pub struct FrontierStore {
    conn: Connection,
    lock: Arc<Mutex<()>>,
    /// Mirror of every URL ever admitted, checked before touching the database
    seen: Arc<DashSet<String>>,
}

impl FrontierStore {
    /// Create a store on an open connection, creating the schema if needed
    #[instrument(skip(conn))]
    pub async fn new(conn: Connection) -> Result<Self, FrontierError> {
        schema::initialize_schema(&conn).await?;

        let store = Self {
            conn,
            lock: Arc::new(Mutex::new(())),
            seen: Arc::new(DashSet::new()),
        };
        store.load_seen().await?;

        Ok(store)
    }

    /// Open (or create) a store from a database file path
    pub async fn new_from_path(path: &str) -> Result<Self, FrontierError> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| FrontierError::Connection(format!("Failed to open database: {}", e)))?;

        let conn = db
            .connect()
            .map_err(|e| FrontierError::Connection(format!("Failed to connect to database: {}", e)))?;

        Self::new(conn).await
    }

    async fn load_seen(&self) -> Result<(), FrontierError> {
        let mut rows = self
            .conn
            .query("SELECT url FROM frontier", params![])
            .await
            .map_err(|e| FrontierError::Query(format!("Failed to load frontier urls: {}", e)))?;

        while let Some(row) = rows.next().await? {
            let url: String = row
                .get(0)
                .map_err(|e| FrontierError::Data(format!("Failed to read url: {}", e)))?;
            self.seen.insert(url);
        }

        if !self.seen.is_empty() {
            info!("Resuming frontier with {} known URLs", self.seen.len());
        }
        Ok(())
    }

    /// Admit `url` at `depth` unless it was admitted before
    ///
    /// The URL is normalized again before use, so callers can pass any parsed URL.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn enqueue(&self, url: &Url, depth: u32) -> Result<EnqueueOutcome, FrontierError> {
        let key = normalize(url.as_str(), None)
            .map_err(|e| FrontierError::Data(e.to_string()))?
            .to_string();

        if self.seen.contains(&key) {
            return Ok(EnqueueOutcome::AlreadyExists);
        }

        let _guard = self.lock.lock().await;
        let inserted = self
            .conn
            .execute(
                "INSERT INTO frontier (url, status, depth, updated_at) VALUES (?, 'queued', ?, ?)
                 ON CONFLICT(url) DO NOTHING",
                params![key.clone(), i64::from(depth), now_millis()],
            )
            .await
            .map_err(|e| FrontierError::Query(format!("Failed to enqueue url: {}", e)))?;
        self.seen.insert(key);

        if inserted == 0 {
            Ok(EnqueueOutcome::AlreadyExists)
        } else {
            debug!(depth, "Enqueued");
            Ok(EnqueueOutcome::Inserted)
        }
    }

    /// Move the shallowest queued entry to `processing` and return it
    ///
    /// Entries of equal depth come out in admission order.
    #[instrument(skip(self))]
    pub async fn claim_next(&self) -> Result<Option<ClaimedUrl>, FrontierError> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "UPDATE frontier SET status = 'processing', updated_at = ?
                 WHERE status = 'queued' AND url = (
                     SELECT url FROM frontier WHERE status = 'queued'
                     ORDER BY depth ASC, rowid ASC LIMIT 1
                 )
                 RETURNING url, depth",
                params![now_millis()],
            )
            .await
            .map_err(|e| FrontierError::Query(format!("Failed to claim url: {}", e)))?;

        match rows.next().await? {
            Some(row) => {
                let url: String = row
                    .get(0)
                    .map_err(|e| FrontierError::Data(format!("Failed to read url: {}", e)))?;
                let depth = depth_from(&row, 1)?;
                Ok(Some(ClaimedUrl { url, depth }))
            }
            None => Ok(None),
        }
    }

    /// Record the final status of a claimed entry
    ///
    /// Repeating the same terminal status is a no-op; anything else on an entry
    /// that is not `processing` is an [`FrontierError::InvalidTransition`].
    #[instrument(skip(self))]
    pub async fn mark_terminal(&self, url: &str, status: FrontierStatus) -> Result<(), FrontierError> {
        if !status.is_terminal() {
            return Err(FrontierError::InvalidTransition {
                url: url.to_string(),
                from: FrontierStatus::Processing.to_string(),
                to: status.to_string(),
            });
        }

        let _guard = self.lock.lock().await;
        let changed = self
            .conn
            .execute(
                "UPDATE frontier SET status = ?, updated_at = ? WHERE url = ? AND status = 'processing'",
                params![status.as_str(), now_millis(), url],
            )
            .await
            .map_err(|e| FrontierError::Query(format!("Failed to update status: {}", e)))?;

        if changed > 0 {
            return Ok(());
        }

        match self.fetch_entry(url).await? {
            None => Err(FrontierError::UnknownEntry(url.to_string())),
            Some(entry) if entry.status == status => Ok(()),
            Some(entry) => Err(FrontierError::InvalidTransition {
                url: url.to_string(),
                from: entry.status.to_string(),
                to: status.to_string(),
            }),
        }
    }

    /// Look up a single entry
    pub async fn get_entry(&self, url: &str) -> Result<Option<FrontierEntry>, FrontierError> {
        let _guard = self.lock.lock().await;
        self.fetch_entry(url).await
    }

    async fn fetch_entry(&self, url: &str) -> Result<Option<FrontierEntry>, FrontierError> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, status, depth, updated_at FROM frontier WHERE url = ?",
                params![url],
            )
            .await
            .map_err(|e| FrontierError::Query(format!("Failed to get entry: {}", e)))?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_entry(&row)?)),
            None => Ok(None),
        }
    }

    /// Count rows per status
    #[instrument(skip(self))]
    pub async fn status_counts(&self) -> Result<FrontierCounts, FrontierError> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT status, COUNT(*) FROM frontier GROUP BY status",
                params![],
            )
            .await
            .map_err(|e| FrontierError::Query(format!("Failed to count entries: {}", e)))?;

        let mut counts = FrontierCounts::default();
        while let Some(row) = rows.next().await? {
            let status: String = row
                .get(0)
                .map_err(|e| FrontierError::Data(format!("Failed to read status: {}", e)))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| FrontierError::Data(format!("Failed to read count: {}", e)))?;
            let count = count.max(0) as u64;

            match FrontierStatus::parse(&status) {
                Some(FrontierStatus::Queued) => counts.queued = count,
                Some(FrontierStatus::Processing) => counts.processing = count,
                Some(FrontierStatus::Completed) => counts.completed = count,
                Some(FrontierStatus::Failed) => counts.failed = count,
                None => warn!("Ignoring unknown frontier status '{}'", status),
            }
        }

        Ok(counts)
    }

    /// Put `processing` rows untouched for at least `older_than` back in the queue
    ///
    /// Only meant for recovering from a crash, when no worker can still own them.
    #[instrument(skip(self))]
    pub async fn requeue_orphaned(&self, older_than: Duration) -> Result<u64, FrontierError> {
        let now = now_millis();
        let cutoff = now.saturating_sub(older_than.as_millis() as i64);

        let _guard = self.lock.lock().await;
        let requeued = self
            .conn
            .execute(
                "UPDATE frontier SET status = 'queued', updated_at = ?
                 WHERE status = 'processing' AND updated_at <= ?",
                params![now, cutoff],
            )
            .await
            .map_err(|e| FrontierError::Query(format!("Failed to requeue entries: {}", e)))?;

        if requeued > 0 {
            info!("Requeued {} orphaned entries", requeued);
        }
        Ok(requeued)
    }

    /// Politeness row for a domain, if one was ever written
    pub async fn domain_delay(&self, domain: &str) -> Result<Option<DomainDelayRow>, FrontierError> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT last_request, delay_seconds FROM domain_delay WHERE domain = ?",
                params![domain],
            )
            .await
            .map_err(|e| FrontierError::Query(format!("Failed to get domain delay: {}", e)))?;

        match rows.next().await? {
            Some(row) => {
                let last_request = match row.get_value(0)? {
                    Value::Integer(ms) => Some(ms),
                    Value::Real(ms) => Some(ms as i64),
                    _ => None,
                };
                let delay_seconds = match row.get_value(1)? {
                    Value::Real(secs) => secs,
                    Value::Integer(secs) => secs as f64,
                    other => {
                        return Err(FrontierError::Data(format!(
                            "Unexpected delay_seconds value: {:?}",
                            other
                        )));
                    }
                };
                Ok(Some(DomainDelayRow {
                    last_request,
                    delay_seconds,
                }))
            }
            None => Ok(None),
        }
    }

    /// Stamp the time of the latest request to `domain`
    pub async fn record_request(
        &self,
        domain: &str,
        at_millis: i64,
        delay_seconds: f64,
    ) -> Result<(), FrontierError> {
        let _guard = self.lock.lock().await;
        self.conn
            .execute(
                "INSERT INTO domain_delay (domain, last_request, delay_seconds) VALUES (?, ?, ?)
                 ON CONFLICT(domain) DO UPDATE SET
                 last_request = excluded.last_request,
                 delay_seconds = excluded.delay_seconds",
                params![domain, at_millis, delay_seconds],
            )
            .await
            .map_err(|e| FrontierError::Query(format!("Failed to record request: {}", e)))?;
        Ok(())
    }

    /// Cached robots.txt body for a domain
    pub async fn robots_rules(&self, domain: &str) -> Result<Option<RobotsRow>, FrontierError> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT rules, fetched_at FROM robots_cache WHERE domain = ?",
                params![domain],
            )
            .await
            .map_err(|e| FrontierError::Query(format!("Failed to get robots rules: {}", e)))?;

        match rows.next().await? {
            Some(row) => {
                let rules: String = row
                    .get(0)
                    .map_err(|e| FrontierError::Data(format!("Failed to read rules: {}", e)))?;
                let fetched_at: i64 = row
                    .get(1)
                    .map_err(|e| FrontierError::Data(format!("Failed to read fetched_at: {}", e)))?;
                Ok(Some(RobotsRow { rules, fetched_at }))
            }
            None => Ok(None),
        }
    }

    /// Replace the cached robots.txt body for a domain
    pub async fn store_robots(
        &self,
        domain: &str,
        rules: &str,
        fetched_at: i64,
    ) -> Result<(), FrontierError> {
        let _guard = self.lock.lock().await;
        self.conn
            .execute(
                "INSERT INTO robots_cache (domain, rules, fetched_at) VALUES (?, ?, ?)
                 ON CONFLICT(domain) DO UPDATE SET
                 rules = excluded.rules,
                 fetched_at = excluded.fetched_at",
                params![domain, rules, fetched_at],
            )
            .await
            .map_err(|e| FrontierError::Query(format!("Failed to store robots rules: {}", e)))?;
        Ok(())
    }
}

fn depth_from(row: &Row, idx: i32) -> Result<u32, FrontierError> {
    let depth: i64 = row
        .get(idx)
        .map_err(|e| FrontierError::Data(format!("Failed to read depth: {}", e)))?;
    u32::try_from(depth).map_err(|_| FrontierError::Data(format!("Invalid depth {}", depth)))
}

fn row_to_entry(row: &Row) -> Result<FrontierEntry, FrontierError> {
    let url: String = row
        .get(0)
        .map_err(|e| FrontierError::Data(format!("Failed to read url: {}", e)))?;
    let status: String = row
        .get(1)
        .map_err(|e| FrontierError::Data(format!("Failed to read status: {}", e)))?;
    let status = FrontierStatus::parse(&status)
        .ok_or_else(|| FrontierError::Data(format!("Unknown status '{}'", status)))?;
    let depth = depth_from(row, 2)?;
    let updated_at: i64 = row
        .get(3)
        .map_err(|e| FrontierError::Data(format!("Failed to read updated_at: {}", e)))?;

    Ok(FrontierEntry {
        url,
        status,
        depth,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use tempfile::tempdir;

    async fn setup_test_store() -> Result<(FrontierStore, tempfile::TempDir), FrontierError> {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir
            .path()
            .join("frontier.db")
            .to_string_lossy()
            .to_string();

        let store = FrontierStore::new_from_path(&db_path).await?;
        Ok((store, temp_dir))
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let (store, _temp_dir) = setup_test_store().await.unwrap();

        let mut rows = store
            .conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('frontier', 'domain_delay', 'robots_cache')",
                params![],
            )
            .await
            .unwrap();

        let mut tables = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let name: String = row.get(0).unwrap();
            tables.push(name);
        }
        assert_eq!(tables.len(), 3);
    }

    #[tokio::test]
    async fn test_enqueue_admits_once() {
        let (store, _temp_dir) = setup_test_store().await.unwrap();

        let first = store.enqueue(&url("https://shop.test/laptop"), 0).await.unwrap();
        let second = store.enqueue(&url("https://WWW.shop.test/laptop/#specs"), 3).await.unwrap();
        assert_eq!(first, EnqueueOutcome::Inserted);
        assert_eq!(second, EnqueueOutcome::AlreadyExists);

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.total(), 1);

        let entry = store.get_entry("https://shop.test/laptop").await.unwrap().unwrap();
        assert_eq!(entry.depth, 0);
        assert_eq!(entry.status, FrontierStatus::Queued);
    }

    #[tokio::test]
    async fn test_claim_is_breadth_first() {
        let (store, _temp_dir) = setup_test_store().await.unwrap();

        store.enqueue(&url("https://shop.test/deep"), 1).await.unwrap();
        store.enqueue(&url("https://shop.test/seed"), 0).await.unwrap();
        store.enqueue(&url("https://shop.test/deeper"), 2).await.unwrap();

        let first = store.claim_next().await.unwrap().unwrap();
        assert_eq!(first.url, "https://shop.test/seed");
        assert_eq!(first.depth, 0);

        let second = store.claim_next().await.unwrap().unwrap();
        assert_eq!(second.url, "https://shop.test/deep");

        let third = store.claim_next().await.unwrap().unwrap();
        assert_eq!(third.depth, 2);

        assert!(store.claim_next().await.unwrap().is_none());

        let entry = store.get_entry("https://shop.test/seed").await.unwrap().unwrap();
        assert_eq!(entry.status, FrontierStatus::Processing);
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_disjoint() {
        let (store, _temp_dir) = setup_test_store().await.unwrap();

        for i in 0..20 {
            store
                .enqueue(&url(&format!("https://shop.test/item-{}", i)), 0)
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(entry) = store.claim_next().await.unwrap() {
                    claimed.push(entry.url);
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(all.len(), 20);
        assert_eq!(unique.len(), 20);
    }

    #[tokio::test]
    async fn test_mark_terminal_transitions() {
        let (store, _temp_dir) = setup_test_store().await.unwrap();
        let key = "https://shop.test/phone";

        store.enqueue(&url(key), 0).await.unwrap();

        // Not claimed yet
        let err = store.mark_terminal(key, FrontierStatus::Completed).await.unwrap_err();
        assert!(matches!(err, FrontierError::InvalidTransition { .. }));

        store.claim_next().await.unwrap().unwrap();
        tokio_test::assert_ok!(store.mark_terminal(key, FrontierStatus::Completed).await);
        // Same status again is a no-op
        tokio_test::assert_ok!(store.mark_terminal(key, FrontierStatus::Completed).await);

        let err = store.mark_terminal(key, FrontierStatus::Failed).await.unwrap_err();
        assert!(matches!(err, FrontierError::InvalidTransition { .. }));

        let err = store
            .mark_terminal("https://shop.test/unknown", FrontierStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, FrontierError::UnknownEntry(_)));

        let err = store.mark_terminal(key, FrontierStatus::Queued).await.unwrap_err();
        assert!(matches!(err, FrontierError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_terminal_entries_are_never_requeued_by_enqueue() {
        let (store, _temp_dir) = setup_test_store().await.unwrap();
        let key = "https://shop.test/tablet";

        store.enqueue(&url(key), 0).await.unwrap();
        store.claim_next().await.unwrap();
        store.mark_terminal(key, FrontierStatus::Failed).await.unwrap();

        let outcome = store.enqueue(&url(key), 0).await.unwrap();
        assert_eq!(outcome, EnqueueOutcome::AlreadyExists);
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("frontier.db").to_string_lossy().to_string();

        {
            let store = FrontierStore::new_from_path(&db_path).await.unwrap();
            store.enqueue(&url("https://shop.test/a"), 0).await.unwrap();
            store.enqueue(&url("https://shop.test/b"), 1).await.unwrap();
            store.claim_next().await.unwrap();
            store
                .mark_terminal("https://shop.test/a", FrontierStatus::Completed)
                .await
                .unwrap();
        }

        let store = FrontierStore::new_from_path(&db_path).await.unwrap();
        assert_eq!(
            store.enqueue(&url("https://shop.test/a"), 0).await.unwrap(),
            EnqueueOutcome::AlreadyExists
        );

        let next = store.claim_next().await.unwrap().unwrap();
        assert_eq!(next.url, "https://shop.test/b");
        assert_eq!(next.depth, 1);
    }

    #[tokio::test]
    async fn test_requeue_orphaned() {
        let (store, _temp_dir) = setup_test_store().await.unwrap();

        store.enqueue(&url("https://shop.test/a"), 0).await.unwrap();
        store.enqueue(&url("https://shop.test/b"), 0).await.unwrap();
        store.claim_next().await.unwrap();

        // Too recent to be considered orphaned
        assert_eq!(store.requeue_orphaned(Duration::from_secs(3600)).await.unwrap(), 0);

        assert_eq!(store.requeue_orphaned(Duration::ZERO).await.unwrap(), 1);
        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.queued, 2);
        assert_eq!(counts.processing, 0);
    }

    #[tokio::test]
    async fn test_domain_delay_and_robots_rows() {
        let (store, _temp_dir) = setup_test_store().await.unwrap();

        assert!(store.domain_delay("shop.test").await.unwrap().is_none());
        store.record_request("shop.test", 1_000, 1.5).await.unwrap();
        store.record_request("shop.test", 2_000, 1.5).await.unwrap();
        let row = store.domain_delay("shop.test").await.unwrap().unwrap();
        assert_eq!(row.last_request, Some(2_000));
        assert_eq!(row.delay_seconds, 1.5);

        assert!(store.robots_rules("shop.test").await.unwrap().is_none());
        store
            .store_robots("shop.test", "User-agent: *\nDisallow: /private/", 42)
            .await
            .unwrap();
        let robots = store.robots_rules("shop.test").await.unwrap().unwrap();
        assert_eq!(robots.fetched_at, 42);
        assert!(robots.rules.contains("/private/"));
    }
}
