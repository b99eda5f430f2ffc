//! # Frontier Store Error Types
//!
//! Errors raised by the durable crawl state. A failing statement is local to
//! the worker that issued it; the controller only escalates to a shutdown when
//! the store keeps failing to hand out work.

use crate::error::Error as CrateError;
use thiserror::Error;

/// Error type for frontier store operations
#[derive(Debug, Error)]
pub enum FrontierError {
    /// LibSQL error
    #[error("LibSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// SQL query error
    #[error("SQL query error: {0}")]
    Query(String),

    /// Schema error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Data error
    #[error("Data error: {0}")]
    Data(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// A status change that would move an entry backwards or skip `processing`
    #[error("Invalid transition for {url}: {from} -> {to}")]
    InvalidTransition {
        url: String,
        from: String,
        to: String,
    },

    /// The URL has never been admitted to the frontier
    #[error("Unknown frontier entry: {0}")]
    UnknownEntry(String),
}

impl From<FrontierError> for CrateError {
    fn from(err: FrontierError) -> Self {
        CrateError::Store(err.to_string())
    }
}
