//! # Frontier Schema
//!
//! Three tables back the crawl:
//! 1. `frontier` - one row per normalized URL with its status and BFS depth
//! 2. `domain_delay` - last request time and configured delay per domain
//! 3. `robots_cache` - raw robots.txt body per domain and when it was fetched
//!
//! Timestamps are stored as unix epoch milliseconds.

use crate::frontier::error::FrontierError;
use libsql::{Connection, params};

/// Initialize the database schema
pub async fn initialize_schema(conn: &Connection) -> Result<(), FrontierError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS frontier (
            url TEXT PRIMARY KEY,
            status TEXT NOT NULL CHECK(status IN ('queued', 'processing', 'completed', 'failed')),
            depth INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        )",
        params![],
    )
    .await
    .map_err(|e| FrontierError::Schema(format!("Failed to create frontier table: {}", e)))?;

    // Claims scan queued rows in depth order
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_frontier_status_depth ON frontier(status, depth)",
        params![],
    )
    .await
    .map_err(|e| FrontierError::Schema(format!("Failed to create index on frontier: {}", e)))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS domain_delay (
            domain TEXT PRIMARY KEY,
            last_request INTEGER,
            delay_seconds REAL NOT NULL DEFAULT 1.0
        )",
        params![],
    )
    .await
    .map_err(|e| FrontierError::Schema(format!("Failed to create domain_delay table: {}", e)))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS robots_cache (
            domain TEXT PRIMARY KEY,
            rules TEXT NOT NULL,
            fetched_at INTEGER NOT NULL
        )",
        params![],
    )
    .await
    .map_err(|e| FrontierError::Schema(format!("Failed to create robots_cache table: {}", e)))?;

    Ok(())
}
