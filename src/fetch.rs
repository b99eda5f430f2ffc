//! # Page Fetching
//!
//! The crawler talks to the network only through the [`Fetcher`] trait, so the
//! scheduling logic can be exercised against an in-memory fake and the HTTP
//! details stay in one place.
//!
//! ## Key Components
//!
//! - `Fetcher`: one GET with a deadline, returning status and body
//! - `HttpFetcher`: the reqwest-backed implementation
//! - `RetryPolicy`: classifies responses and computes exponential backoff

mod http;
mod retry;

pub use http::HttpFetcher;
pub use retry::{Attempt, RetryPolicy};

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Status and body of a completed HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure to obtain any response at all
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The request did not complete within its deadline
    #[error("request timed out")]
    Timeout,

    /// Connection, TLS or body decoding failure
    #[error("transport error: {0}")]
    Transport(String),
}

/// Issues a single GET request
///
/// Implementations must not retry; retries and politeness are the caller's job.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send;
}
