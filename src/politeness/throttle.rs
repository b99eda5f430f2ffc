//! Per-domain request spacing

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::OnceCell;
use tracing::{Instrument, debug, debug_span, instrument};

use crate::frontier::{FrontierError, FrontierStore, now_millis};

/// Spacing state for one domain
struct DomainGate {
    delay: Duration,
    /// Admits one request per `delay`; `None` when the delay is zero
    limiter: Option<DefaultDirectRateLimiter>,
    /// Set once the last request recorded by a previous run has been honoured
    restored: OnceCell<()>,
}

impl DomainGate {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            limiter: Quota::with_period(delay).map(RateLimiter::direct),
            restored: OnceCell::new(),
        }
    }
}

/// Keeps requests to the same domain at least the configured delay apart
///
/// Domains never wait on each other; callers for the same domain are admitted
/// one delay window at a time.
pub struct DomainThrottle {
    store: FrontierStore,
    default_delay: Duration,
    overrides: HashMap<String, Duration>,
    gates: DashMap<String, Arc<DomainGate>>,
}

impl DomainThrottle {
    pub fn new(
        store: FrontierStore,
        default_delay: Duration,
        overrides: HashMap<String, Duration>,
    ) -> Self {
        Self {
            store,
            default_delay,
            overrides,
            gates: DashMap::new(),
        }
    }

    /// Delay that applies to `domain`
    pub fn delay_for(&self, domain: &str) -> Duration {
        self.overrides
            .get(domain)
            .copied()
            .unwrap_or(self.default_delay)
    }

    fn gate(&self, domain: &str) -> Arc<DomainGate> {
        self.gates
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(DomainGate::new(self.delay_for(domain))))
            .value()
            .clone()
    }

    /// Wait until `domain` may be contacted again, then stamp the request time
    ///
    /// Returns how long the caller was held back.
    #[instrument(skip(self))]
    pub async fn wait_for_domain(&self, domain: &str) -> Result<Duration, FrontierError> {
        let gate = self.gate(domain);
        let started = Instant::now();

        gate.restored
            .get_or_try_init(|| self.honour_previous_run(domain, gate.delay))
            .await?;

        if let Some(limiter) = &gate.limiter {
            limiter
                .until_ready()
                .instrument(debug_span!("politeness", domain))
                .await;
        }

        self.store
            .record_request(domain, now_millis(), gate.delay.as_secs_f64())
            .await?;

        let waited = started.elapsed();
        if !waited.is_zero() {
            debug!(waited_ms = waited.as_millis() as u64, "Held back by politeness delay");
        }
        Ok(waited)
    }

    /// Sleep out whatever remains of the delay after the last request stored on disk
    async fn honour_previous_run(&self, domain: &str, delay: Duration) -> Result<(), FrontierError> {
        if delay.is_zero() {
            return Ok(());
        }

        let Some(row) = self.store.domain_delay(domain).await? else {
            return Ok(());
        };
        let Some(last_request) = row.last_request else {
            return Ok(());
        };

        let elapsed_ms = now_millis().saturating_sub(last_request).max(0) as u128;
        let remaining_ms = delay.as_millis().saturating_sub(elapsed_ms);
        if remaining_ms > 0 {
            debug!(remaining_ms = remaining_ms as u64, "Honouring delay from previous run");
            tokio::time::sleep(Duration::from_millis(remaining_ms as u64)).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TOLERANCE: Duration = Duration::from_millis(50);

    async fn setup_store() -> (FrontierStore, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("throttle.db").to_string_lossy().to_string();
        let store = FrontierStore::new_from_path(&db_path).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_same_domain_requests_are_spaced() {
        let (store, _temp_dir) = setup_store().await;
        let delay = Duration::from_millis(300);
        let throttle = DomainThrottle::new(store.clone(), delay, HashMap::new());

        throttle.wait_for_domain("shop.test").await.unwrap();
        let first = Instant::now();
        throttle.wait_for_domain("shop.test").await.unwrap();
        let second = Instant::now();

        assert!(second.duration_since(first) + TOLERANCE >= delay);

        let row = store.domain_delay("shop.test").await.unwrap().unwrap();
        assert!(row.last_request.is_some());
        assert!((row.delay_seconds - 0.3).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_concurrent_callers_for_one_domain_serialize() {
        let (store, _temp_dir) = setup_store().await;
        let delay = Duration::from_millis(200);
        let throttle = Arc::new(DomainThrottle::new(store, delay, HashMap::new()));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let throttle = throttle.clone();
            handles.push(tokio::spawn(async move {
                throttle.wait_for_domain("shop.test").await.unwrap();
                Instant::now()
            }));
        }

        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap());
        }
        admitted.sort();

        for pair in admitted.windows(2) {
            assert!(pair[1].duration_since(pair[0]) + TOLERANCE >= delay);
        }
    }

    #[tokio::test]
    async fn test_domains_do_not_wait_on_each_other() {
        let (store, _temp_dir) = setup_store().await;
        let throttle = DomainThrottle::new(store, Duration::from_secs(5), HashMap::new());

        let started = Instant::now();
        throttle.wait_for_domain("a.test").await.unwrap();
        throttle.wait_for_domain("b.test").await.unwrap();
        throttle.wait_for_domain("c.test").await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_overrides_and_zero_delay() {
        let (store, _temp_dir) = setup_store().await;
        let mut overrides = HashMap::new();
        overrides.insert("fast.test".to_string(), Duration::ZERO);
        let throttle = DomainThrottle::new(store, Duration::from_secs(5), overrides);

        assert_eq!(throttle.delay_for("fast.test"), Duration::ZERO);
        assert_eq!(throttle.delay_for("slow.test"), Duration::from_secs(5));

        let started = Instant::now();
        for _ in 0..5 {
            throttle.wait_for_domain("fast.test").await.unwrap();
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_delay_carries_over_from_previous_run() {
        let (store, _temp_dir) = setup_store().await;
        let delay = Duration::from_millis(400);
        store
            .record_request("shop.test", now_millis(), delay.as_secs_f64())
            .await
            .unwrap();

        let throttle = DomainThrottle::new(store, delay, HashMap::new());
        let waited = throttle.wait_for_domain("shop.test").await.unwrap();

        assert!(waited + TOLERANCE >= delay);
    }
}
