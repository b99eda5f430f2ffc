//! Frontier store module
//!
//! This module provides the durable crawl state: the URL frontier with its
//! status lifecycle, plus the per-domain politeness and robots.txt rows that
//! must survive a restart alongside it.

pub mod error;
mod schema;
mod store;

pub use error::FrontierError;
pub use store::FrontierStore;

use std::fmt;

/// Crawl status of a frontier entry
///
/// Transitions only move forward: `Queued -> Processing -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontierStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl FrontierStatus {
    /// Column value used in the `frontier` table
    pub fn as_str(&self) -> &'static str {
        match self {
            FrontierStatus::Queued => "queued",
            FrontierStatus::Processing => "processing",
            FrontierStatus::Completed => "completed",
            FrontierStatus::Failed => "failed",
        }
    }

    /// Parse a column value
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(FrontierStatus::Queued),
            "processing" => Some(FrontierStatus::Processing),
            "completed" => Some(FrontierStatus::Completed),
            "failed" => Some(FrontierStatus::Failed),
            _ => None,
        }
    }

    /// Whether no further transition is allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, FrontierStatus::Completed | FrontierStatus::Failed)
    }
}

impl fmt::Display for FrontierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a row of the frontier
#[derive(Debug, Clone, PartialEq)]
pub struct FrontierEntry {
    /// Normalized URL, the unique key
    pub url: String,

    /// Current status
    pub status: FrontierStatus,

    /// BFS distance from the nearest seed
    pub depth: u32,

    /// Last status change, unix epoch milliseconds
    pub updated_at: i64,
}

/// A URL handed to a worker by [`FrontierStore::claim_next`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedUrl {
    pub url: String,
    pub depth: u32,
}

/// Result of [`FrontierStore::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new `queued` row was written
    Inserted,
    /// The URL was admitted before; nothing changed
    AlreadyExists,
}

/// Number of frontier rows per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierCounts {
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl FrontierCounts {
    pub fn total(&self) -> u64 {
        self.queued + self.processing + self.completed + self.failed
    }
}

/// Politeness row for a domain
#[derive(Debug, Clone, PartialEq)]
pub struct DomainDelayRow {
    /// Last request issued to the domain, unix epoch milliseconds
    pub last_request: Option<i64>,

    /// Configured minimum interval between requests
    pub delay_seconds: f64,
}

/// Cached robots.txt for a domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsRow {
    /// Raw robots.txt body, empty when the fetch failed
    pub rules: String,

    /// When the body was fetched, unix epoch milliseconds
    pub fetched_at: i64,
}

/// Current wall-clock time in unix epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_and_terminality() {
        for status in [
            FrontierStatus::Queued,
            FrontierStatus::Processing,
            FrontierStatus::Completed,
            FrontierStatus::Failed,
        ] {
            assert_eq!(FrontierStatus::parse(status.as_str()), Some(status));
        }

        assert!(FrontierStatus::parse("done").is_none());
        assert!(!FrontierStatus::Queued.is_terminal());
        assert!(!FrontierStatus::Processing.is_terminal());
        assert!(FrontierStatus::Completed.is_terminal());
        assert!(FrontierStatus::Failed.is_terminal());
    }

    #[test]
    fn test_counts_total() {
        let counts = FrontierCounts {
            queued: 3,
            processing: 1,
            completed: 5,
            failed: 2,
        };
        assert_eq!(counts.total(), 11);
    }
}
