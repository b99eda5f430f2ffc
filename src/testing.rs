//! In-memory collaborators shared by unit tests

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use url::Url;

use crate::fetch::{FetchError, FetchResponse, Fetcher};
use crate::sink::{PageSink, SinkError};

type Responder = Box<dyn Fn(&Url) -> Result<FetchResponse, FetchError> + Send + Sync>;

/// Fetcher serving canned responses and recording every request
pub(crate) struct FakeFetcher {
    routes: Mutex<HashMap<String, Result<FetchResponse, FetchError>>>,
    fallback: Responder,
    requests: Mutex<Vec<(String, Instant)>>,
}

impl FakeFetcher {
    /// Unknown URLs answer 404
    pub(crate) fn new() -> Self {
        Self::with_fallback(|_| Ok(FetchResponse::new(404, "")))
    }

    /// Unknown URLs are answered by `fallback`
    pub(crate) fn with_fallback(
        fallback: impl Fn(&Url) -> Result<FetchResponse, FetchError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            fallback: Box::new(fallback),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn route(self, url: &str, response: Result<FetchResponse, FetchError>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
        self
    }

    pub(crate) fn page(self, url: &str, html: &str) -> Self {
        self.route(url, Ok(FetchResponse::new(200, html)))
    }

    /// Every requested URL, in order
    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub(crate) fn count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(requested, _)| requested == url)
            .count()
    }

    /// When each request to `url` was issued
    pub(crate) fn request_times(&self, url: &str) -> Vec<Instant> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(requested, _)| requested == url)
            .map(|(_, at)| *at)
            .collect()
    }
}

impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchResponse, FetchError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));

        let routed = self.routes.lock().unwrap().get(url.as_str()).cloned();
        match routed {
            Some(response) => response,
            None => (self.fallback)(url),
        }
    }
}

/// Sink keeping saved URLs in memory
#[derive(Default)]
pub(crate) struct MemorySink {
    saved: Mutex<Vec<String>>,
    failures: AtomicUsize,
    delay: Duration,
}

impl MemorySink {
    /// Every save takes `delay`, and the first `failures` of them fail
    pub(crate) fn failing(failures: usize, delay: Duration) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            delay,
            ..Self::default()
        }
    }

    pub(crate) fn saved(&self) -> Vec<String> {
        self.saved.lock().unwrap().clone()
    }
}

impl PageSink for MemorySink {
    async fn save(&self, url: &Url) -> Result<String, SinkError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(SinkError::Io(std::io::Error::other("disk full")));
        }

        let mut saved = self.saved.lock().unwrap();
        if let Some(position) = saved.iter().position(|existing| existing == url.as_str()) {
            return Ok(format!("mem-{}", position + 1));
        }
        saved.push(url.to_string());
        Ok(format!("mem-{}", saved.len()))
    }
}
