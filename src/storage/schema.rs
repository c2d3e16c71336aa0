//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Stashy database.

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 1;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per distinct canonical URL
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'in_progress', 'done', 'failed')),
    priority INTEGER NOT NULL DEFAULT 0,
    relevance_score REAL NOT NULL DEFAULT 0
        CHECK (relevance_score >= 0 AND relevance_score <= 1),
    source TEXT NOT NULL DEFAULT 'frontier',
    depth INTEGER NOT NULL DEFAULT 0 CHECK (depth >= 0),
    parent_id INTEGER,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    claim_owner TEXT,
    claim_time TEXT,
    not_before TEXT,
    last_error TEXT,
    last_scored_at TEXT,
    processed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    -- in_progress <=> claimed
    CHECK ((status = 'in_progress') = (claim_owner IS NOT NULL AND claim_time IS NOT NULL))
);

-- Claim order over eligible rows: rank desc, retry_count asc, id asc
CREATE INDEX IF NOT EXISTS idx_items_claim ON items(
    status,
    (priority + CAST(relevance_score * 100 AS INTEGER)) DESC,
    retry_count,
    id
);

-- Lease-expiry sweep
CREATE INDEX IF NOT EXISTS idx_items_claim_time ON items(status, claim_time);

-- Raw fetch output, written by the fetch collaborator
CREATE TABLE IF NOT EXISTS fetch_results (
    item_id INTEGER PRIMARY KEY REFERENCES items(id),
    final_url TEXT,
    status_code INTEGER,
    content_type TEXT,
    body TEXT,
    fetched_at TEXT NOT NULL
);

-- Structured extraction, written by the scoring collaborator
CREATE TABLE IF NOT EXISTS extractions (
    item_id INTEGER PRIMARY KEY REFERENCES items(id),
    schema_name TEXT,
    payload TEXT NOT NULL,
    confidence REAL,
    relevance_score REAL NOT NULL DEFAULT 0,
    extracted_at TEXT NOT NULL
);

-- Append-only worker metrics
CREATE TABLE IF NOT EXISTS worker_observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    worker_id TEXT NOT NULL,
    processed_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    frontier_enqueued INTEGER NOT NULL DEFAULT 0,
    avg_latency_ms REAL NOT NULL DEFAULT 0,
    p95_latency_ms REAL NOT NULL DEFAULT 0,
    queue_depth INTEGER NOT NULL DEFAULT 0,
    observed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_worker_observations_worker
    ON worker_observations(worker_id, observed_at);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
