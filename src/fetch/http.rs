//! reqwest-backed [`Fetcher`]

use std::time::Duration;

use reqwest::Client as ReqwestClient;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{Error, Result};
use crate::fetch::{FetchError, FetchResponse, Fetcher};

/// Upper bound for a single connection attempt, independent of the request deadline
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// HTTP client used for pages and robots.txt
#[derive(Clone)]
pub struct HttpFetcher {
    client: ReqwestClient,
}

impl HttpFetcher {
    /// Create a fetcher that identifies itself with `user_agent`
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = ReqwestClient::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(Error::Http)?;

        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    #[instrument(skip(self), fields(url = %url), level = "debug")]
    async fn fetch(&self, url: &Url, timeout: Duration) -> std::result::Result<FetchResponse, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;
        debug!(status, bytes = body.len(), "Fetched");

        Ok(FetchResponse { status, body })
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(err.to_string())
    }
}
