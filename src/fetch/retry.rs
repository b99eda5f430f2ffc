//! Retry classification and exponential backoff for page fetches

use std::time::Duration;

use crate::fetch::{FetchError, FetchResponse};

/// Backoff never grows beyond this, whatever the attempt number
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// What to do with the outcome of one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// 2xx response, stop and use it
    Success(FetchResponse),

    /// 404, stop without retrying
    Permanent { status: u16 },

    /// Timeout, transport failure or any other status; retry if attempts remain
    Retryable(String),
}

/// How often and how patiently a page fetch is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,

    /// Wait before the first retry; doubled for each following retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Initial attempt plus retries
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before retry number `retry` (0 for the first retry)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    /// Sort one attempt's result into success, permanent or retryable failure
    pub fn classify(result: Result<FetchResponse, FetchError>) -> Attempt {
        match result {
            Ok(response) if response.is_success() => Attempt::Success(response),
            Ok(response) if response.status == 404 => Attempt::Permanent {
                status: response.status,
            },
            Ok(response) => Attempt::Retryable(format!("HTTP status {}", response.status)),
            Err(err) => Attempt::Retryable(err.to_string()),
        }
    }
}
