//! Storage traits and error types
//!
//! This module defines the trait interface for frontier store backends and
//! associated error types.

use crate::frontier::{DiscoveredLink, MergeOutcome};
use crate::state::ItemStatus;
use crate::storage::{
    ExtractionRecord, FetchRecord, ItemRecord, ObservationRecord, WorkerObservation,
};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Item not found: {0}")]
    ItemNotFound(i64),

    #[error("Batch size must be greater than zero, got {0}")]
    InvalidBatchSize(usize),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for frontier store implementations
///
/// Every mutating operation either fully applies or fully no-ops. Callers own
/// reconnection policy: a failing store surfaces its error and is never
/// retried from inside these methods.
pub trait FrontierStore {
    // ===== Claim Protocol =====

    /// Atomically reserves up to `batch_size` eligible items for `worker_id`
    ///
    /// Eligible means `pending`, `retry_count < max_retries`, and past any
    /// retry backoff. The highest-ranked rows are transitioned to
    /// `in_progress` and returned in claim order. Concurrent claims never
    /// return the same row. Returns an empty batch when nothing is eligible.
    ///
    /// # Errors
    ///
    /// `StorageError::InvalidBatchSize` when `batch_size == 0`.
    fn claim(&mut self, worker_id: &str, batch_size: usize) -> StorageResult<Vec<ItemRecord>>;

    // ===== Discovery Merge =====

    /// Inserts a new pending item or reconciles the existing one
    ///
    /// Keyed by canonical URL. On an existing row priority and relevance take
    /// the max, depth the min, parent and `seed` source are kept, and a
    /// `done`/`failed` row is resurrected to `pending` with a fresh retry
    /// budget. `pending` and `in_progress` rows keep their status, claim and
    /// retry count.
    fn merge(&mut self, link: &DiscoveredLink) -> StorageResult<MergeOutcome>;

    // ===== Outcome Recorder =====

    /// Marks an item done and releases `worker_id`'s claim on it
    ///
    /// Only the current claim holder can complete an item. Returns `false`
    /// without changing anything when the item is already done, or when
    /// `worker_id` no longer holds it (its lease was reclaimed, or it was
    /// never claimed).
    fn mark_done(&mut self, item_id: i64, worker_id: &str) -> StorageResult<bool>;

    /// Records a failed attempt and releases `worker_id`'s claim
    ///
    /// Increments `retry_count`; the item goes back to `pending` while budget
    /// remains, else to terminal `failed`. Returns the resulting status, or
    /// `None` without changing anything when `worker_id` does not currently
    /// hold the item.
    fn mark_failed(
        &mut self,
        item_id: i64,
        worker_id: &str,
        error: &str,
    ) -> StorageResult<Option<ItemStatus>>;

    /// Returns items claimed longer than `older_than` ago to the queue,
    /// counting the expired lease as a failed attempt
    ///
    /// Returns the ids of the reclaimed items.
    fn reclaim_stale(&mut self, older_than: Duration) -> StorageResult<Vec<i64>>;

    // ===== Metrics =====

    /// Appends a worker observation, returning its timestamp
    ///
    /// Timestamps are strictly increasing per worker.
    fn record(&mut self, observation: &WorkerObservation) -> StorageResult<String>;

    /// Lists observations, oldest first, optionally for one worker
    fn observations(&self, worker_id: Option<&str>) -> StorageResult<Vec<ObservationRecord>>;

    /// The most recent observation of every worker, ordered by worker id
    fn latest_observations(&self) -> StorageResult<Vec<ObservationRecord>>;

    // ===== Collaborator Write Surfaces =====

    /// Stores (or replaces) the raw fetch result for an item
    fn save_fetch_result(&mut self, item_id: i64, fetch: &FetchRecord) -> StorageResult<()>;

    /// Stores (or replaces) the structured extraction for an item
    fn save_extraction(&mut self, item_id: i64, extraction: &ExtractionRecord)
        -> StorageResult<()>;

    // ===== Queries =====

    /// Gets an item by id
    fn get_item(&self, item_id: i64) -> StorageResult<ItemRecord>;

    /// Gets an item by URL (canonicalized before lookup)
    fn get_item_by_url(&self, url: &str) -> StorageResult<Option<ItemRecord>>;

    /// Counts items in a status
    fn count_by_status(&self, status: ItemStatus) -> StorageResult<u64>;

    /// Counts all items
    fn count_total(&self) -> StorageResult<u64>;

    /// Counts items a claim could hand out right now
    fn queue_depth(&self) -> StorageResult<u64>;

    /// Terminally failed items with their last error, most recent first
    fn terminal_failures(&self, limit: usize) -> StorageResult<Vec<ItemRecord>>;
}
