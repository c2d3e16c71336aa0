//! Storage module: the durable frontier queue
//!
//! This module owns every write to the `items` table. Status, claim fields
//! and rank inputs only change through the operations on [`FrontierStore`]:
//! - claiming a ranked batch for a worker
//! - merging a (re)discovered URL
//! - recording an item's outcome and sweeping expired leases
//!
//! It also holds the collaborators' write surfaces (`fetch_results`,
//! `extractions`) and the append-only `worker_observations` table.

mod schema;
mod sqlite;
mod traits;

pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteStore;
pub use traits::{FrontierStore, StorageError, StorageResult};

use crate::config::QueueConfig;
use crate::frontier::{rank, RankKey};
use crate::state::{ItemSource, ItemStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

/// Upper bound on a single retry backoff delay
const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Represents a frontier item in the database
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub id: i64,
    /// Canonical URL, the item's identity
    pub url: String,
    pub status: ItemStatus,
    pub priority: i64,
    pub relevance_score: f64,
    pub source: ItemSource,
    pub depth: u32,
    /// Weak back-reference to the discovering item (lineage only)
    pub parent_id: Option<i64>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub claim_owner: Option<String>,
    pub claim_time: Option<String>,
    /// Earliest time a retried item may be claimed again
    pub not_before: Option<String>,
    pub last_error: Option<String>,
    pub last_scored_at: Option<String>,
    pub processed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ItemRecord {
    /// Current rank, derived from priority and relevance
    pub fn rank(&self) -> i64 {
        rank(self.priority, self.relevance_score)
    }

    /// Total claim-order key
    pub fn rank_key(&self) -> RankKey {
        RankKey::new(
            self.priority,
            self.relevance_score,
            self.retry_count,
            self.id,
        )
    }
}

/// Raw fetch output persisted for an item (one row per item)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchRecord {
    pub final_url: Option<String>,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub body: Option<String>,
}

/// Structured extraction persisted for an item (one row per item)
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRecord {
    pub schema_name: Option<String>,
    pub payload: serde_json::Value,
    pub confidence: Option<f64>,
    /// Page relevance as computed by the scorer
    pub relevance_score: f64,
}

/// One append-only metrics observation reported by a worker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerObservation {
    pub worker_id: String,
    pub processed_count: u64,
    pub failed_count: u64,
    pub frontier_enqueued: u64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub queue_depth: u64,
}

/// A stored observation with its id and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    pub id: i64,
    pub observation: WorkerObservation,
    pub observed_at: String,
}

/// Retry and error-retention policy applied by the store
#[derive(Debug, Clone, PartialEq)]
pub struct QueuePolicy {
    /// Retry budget stamped on newly inserted items
    pub max_retries: u32,
    /// Base retry delay; zero means a failed item is eligible immediately
    pub retry_backoff: Duration,
    /// Maximum stored length of `last_error`, in characters
    pub error_max_len: usize,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::ZERO,
            error_max_len: 4096,
        }
    }
}

impl From<&QueueConfig> for QueuePolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_backoff: Duration::from_secs(config.retry_backoff_secs),
            error_max_len: config.error_max_len,
        }
    }
}

impl QueuePolicy {
    /// Delay before the `attempt`-th retry (1-based), doubling each time
    pub fn backoff_for(&self, attempt: u32) -> Option<Duration> {
        if self.retry_backoff.is_zero() {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        Some(
            self.retry_backoff
                .checked_mul(factor)
                .unwrap_or(MAX_BACKOFF)
                .min(MAX_BACKOFF),
        )
    }

    /// Truncates an error message to the configured length on a char boundary
    pub fn truncate_error(&self, error: &str) -> String {
        match error.char_indices().nth(self.error_max_len) {
            Some((byte_idx, _)) => error[..byte_idx].to_string(),
            None => error.to_string(),
        }
    }
}

/// Formats a timestamp the way every column in the store expects it.
///
/// Fixed-width UTC with microseconds, so lexicographic order in SQL equals
/// chronological order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a timestamp written by [`format_timestamp`]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
