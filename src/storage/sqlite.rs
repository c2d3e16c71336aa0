//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the FrontierStore
//! trait.
//!
//! Each worker opens its own `SqliteStore` on the shared database file. All
//! mutations run inside `BEGIN IMMEDIATE` transactions, which take the
//! database write lock up front, so reading a row's pre-image and writing its
//! new state is one atomic unit with respect to every other connection.
//! SQLite has no row locks: concurrent claims serialize on that lock, waiting
//! up to the busy timeout, and each one sees the rows the previous claim
//! already took out of `pending`.

use crate::frontier::{
    reconcile, DiscoveredLink, MergeOutcome, MergeState, RANK_SQL,
};
use crate::state::{ItemSource, ItemStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{FrontierStore, StorageError, StorageResult};
use crate::storage::{
    format_timestamp, parse_timestamp, ExtractionRecord, FetchRecord, ItemRecord,
    ObservationRecord, QueuePolicy, WorkerObservation,
};
use crate::url::canonicalize_url;
use crate::StashyError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

/// How long a connection waits on another connection's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ITEM_COLUMNS: &str = "id, url, status, priority, relevance_score, source, depth, parent_id,
     retry_count, max_retries, claim_owner, claim_time, not_before, last_error,
     last_scored_at, processed_at, created_at, updated_at";

const OBSERVATION_COLUMNS: &str = "id, worker_id, processed_count, failed_count, frontier_enqueued,
     avg_latency_ms, p95_latency_ms, queue_depth, observed_at";

/// SQLite storage backend
pub struct SqliteStore {
    conn: Connection,
    policy: QueuePolicy,
}

impl SqliteStore {
    /// Opens (or creates) a store backed by a database file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `policy` - Retry and error-retention policy for this connection
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StashyError)` - Failed to open database
    pub fn new(path: &Path, policy: QueuePolicy) -> Result<Self, StashyError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // Configure SQLite for concurrent readers and a single short writer
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn, policy })
    }

    /// Creates a private in-memory store (tests and dry runs)
    pub fn open_in_memory(policy: QueuePolicy) -> Result<Self, StashyError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn, policy })
    }
}

/// Reads a status column, surfacing unknown values as a conversion failure
fn status_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<ItemStatus> {
    let status_str: String = row.get(idx)?;
    ItemStatus::from_db_string(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(StorageError::CorruptRow(format!(
                "unknown status '{}'",
                status_str
            ))),
        )
    })
}

/// Maps a full `ITEM_COLUMNS` row to an ItemRecord
fn row_to_item(row: &Row<'_>) -> rusqlite::Result<ItemRecord> {
    Ok(ItemRecord {
        id: row.get(0)?,
        url: row.get(1)?,
        status: status_column(row, 2)?,
        priority: row.get(3)?,
        relevance_score: row.get(4)?,
        source: ItemSource::from_db_string(&row.get::<_, String>(5)?),
        depth: row.get(6)?,
        parent_id: row.get(7)?,
        retry_count: row.get(8)?,
        max_retries: row.get(9)?,
        claim_owner: row.get(10)?,
        claim_time: row.get(11)?,
        not_before: row.get(12)?,
        last_error: row.get(13)?,
        last_scored_at: row.get(14)?,
        processed_at: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

/// Maps an `OBSERVATION_COLUMNS` row to an ObservationRecord
fn row_to_observation(row: &Row<'_>) -> rusqlite::Result<ObservationRecord> {
    Ok(ObservationRecord {
        id: row.get(0)?,
        observation: WorkerObservation {
            worker_id: row.get(1)?,
            processed_count: row.get::<_, i64>(2)? as u64,
            failed_count: row.get::<_, i64>(3)? as u64,
            frontier_enqueued: row.get::<_, i64>(4)? as u64,
            avg_latency_ms: row.get(5)?,
            p95_latency_ms: row.get(6)?,
            queue_depth: row.get::<_, i64>(7)? as u64,
        },
        observed_at: row.get(8)?,
    })
}

fn load_item(conn: &Connection, item_id: i64) -> StorageResult<ItemRecord> {
    conn.query_row(
        &format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS),
        params![item_id],
        row_to_item,
    )
    .optional()?
    .ok_or(StorageError::ItemNotFound(item_id))
}

/// The fields the outcome recorder needs to decide whether a caller may
/// still report on an item
struct OutcomeState {
    status: ItemStatus,
    retry_count: u32,
    max_retries: u32,
    claim_owner: Option<String>,
}

impl OutcomeState {
    fn claimed_by(&self, worker_id: &str) -> bool {
        self.status == ItemStatus::InProgress && self.claim_owner.as_deref() == Some(worker_id)
    }
}

fn load_outcome_state(conn: &Connection, item_id: i64) -> StorageResult<OutcomeState> {
    conn.query_row(
        "SELECT status, retry_count, max_retries, claim_owner FROM items WHERE id = ?1",
        params![item_id],
        |row| {
            Ok(OutcomeState {
                status: status_column(row, 0)?,
                retry_count: row.get(1)?,
                max_retries: row.get(2)?,
                claim_owner: row.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or(StorageError::ItemNotFound(item_id))
}

/// Records one failed attempt on a row and releases its claim.
///
/// Shared by `mark_failed` and the lease-expiry sweep so both count retries
/// the same way.
fn apply_failure(
    conn: &Connection,
    policy: &QueuePolicy,
    item_id: i64,
    retry_count: u32,
    max_retries: u32,
    error: &str,
    now: chrono::DateTime<Utc>,
) -> StorageResult<ItemStatus> {
    let attempts = retry_count.saturating_add(1);
    let next_status = if attempts >= max_retries {
        ItemStatus::Failed
    } else {
        ItemStatus::Pending
    };

    let not_before = match next_status {
        ItemStatus::Pending => policy
            .backoff_for(attempts)
            .and_then(|delay| chrono::Duration::from_std(delay).ok())
            .and_then(|delay| now.checked_add_signed(delay))
            .map(format_timestamp),
        _ => None,
    };

    conn.execute(
        "UPDATE items
         SET status = ?1, retry_count = ?2, claim_owner = NULL, claim_time = NULL,
             not_before = ?3, last_error = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            next_status.to_db_string(),
            attempts,
            not_before,
            policy.truncate_error(error),
            format_timestamp(now),
            item_id
        ],
    )?;

    Ok(next_status)
}

impl FrontierStore for SqliteStore {
    // ===== Claim Protocol =====

    fn claim(&mut self, worker_id: &str, batch_size: usize) -> StorageResult<Vec<ItemRecord>> {
        if batch_size == 0 {
            return Err(StorageError::InvalidBatchSize(batch_size));
        }

        let now = format_timestamp(Utc::now());
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidates: Vec<i64> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT id FROM items
                 WHERE status = ?1
                   AND retry_count < max_retries
                   AND (not_before IS NULL OR not_before <= ?2)
                 ORDER BY {} DESC, retry_count ASC, id ASC
                 LIMIT ?3",
                RANK_SQL
            ))?;
            let ids = stmt
                .query_map(
                    params![
                        ItemStatus::Pending.to_db_string(),
                        now,
                        batch_size as i64
                    ],
                    |row| row.get(0),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        let mut claimed = Vec::with_capacity(candidates.len());
        for item_id in candidates {
            let changed = tx.execute(
                "UPDATE items
                 SET status = ?1, claim_owner = ?2, claim_time = ?3, updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![
                    ItemStatus::InProgress.to_db_string(),
                    worker_id,
                    now,
                    item_id,
                    ItemStatus::Pending.to_db_string()
                ],
            )?;

            // The write lock already excludes other claimants; the status
            // guard keeps the transition pending -> in_progress only
            if changed == 1 {
                claimed.push(load_item(&tx, item_id)?);
            }
        }

        tx.commit()?;

        claimed.sort_by_key(|item| item.rank_key());
        tracing::debug!("Worker {} claimed {} items", worker_id, claimed.len());
        Ok(claimed)
    }

    // ===== Discovery Merge =====

    fn merge(&mut self, link: &DiscoveredLink) -> StorageResult<MergeOutcome> {
        let url = canonicalize_url(&link.url)
            .map_err(|e| StorageError::InvalidUrl(format!("{}: {}", link.url, e)))?;
        let incoming = link.sanitized();
        let now = format_timestamp(Utc::now());

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<(i64, MergeState)> = tx
            .query_row(
                "SELECT id, status, priority, relevance_score, depth, parent_id, source
                 FROM items WHERE url = ?1",
                params![url.as_str()],
                |row| {
                    let id: i64 = row.get(0)?;
                    let state = MergeState {
                        status: status_column(row, 1)?,
                        priority: row.get(2)?,
                        relevance_score: row.get(3)?,
                        depth: row.get(4)?,
                        parent_id: row.get(5)?,
                        source: ItemSource::from_db_string(&row.get::<_, String>(6)?),
                    };
                    Ok((id, state))
                },
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO items
                     (url, status, priority, relevance_score, source, depth, parent_id,
                      retry_count, max_retries, last_scored_at, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?9, ?9)",
                    params![
                        url.as_str(),
                        ItemStatus::Pending.to_db_string(),
                        incoming.priority,
                        incoming.relevance_score,
                        incoming.source.to_db_string(),
                        incoming.depth,
                        incoming.parent_id,
                        self.policy.max_retries,
                        now
                    ],
                )?;
                MergeOutcome::Inserted {
                    item_id: tx.last_insert_rowid(),
                }
            }
            Some((item_id, state)) => {
                let merged = reconcile(&state, &incoming);

                tx.execute(
                    "UPDATE items
                     SET priority = ?1, relevance_score = ?2, depth = ?3, parent_id = ?4,
                         source = ?5, last_scored_at = ?6, updated_at = ?6
                     WHERE id = ?7",
                    params![
                        merged.priority,
                        merged.relevance_score,
                        merged.depth,
                        merged.parent_id,
                        merged.source.to_db_string(),
                        now,
                        item_id
                    ],
                )?;

                if merged.resurrect {
                    tx.execute(
                        "UPDATE items
                         SET status = ?1, claim_owner = NULL, claim_time = NULL,
                             retry_count = 0, not_before = NULL
                         WHERE id = ?2",
                        params![ItemStatus::Pending.to_db_string(), item_id],
                    )?;
                    tracing::debug!(
                        "Resurrected {} item {} ({})",
                        state.status,
                        item_id,
                        url
                    );
                }

                MergeOutcome::Updated {
                    item_id,
                    resurrected: merged.resurrect,
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    // ===== Outcome Recorder =====

    fn mark_done(&mut self, item_id: i64, worker_id: &str) -> StorageResult<bool> {
        let now = format_timestamp(Utc::now());
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let state = load_outcome_state(&tx, item_id)?;
        if state.status == ItemStatus::Done {
            return Ok(false);
        }
        if !state.claimed_by(worker_id) {
            tracing::warn!(
                "Worker {} no longer holds item {} ({}, owner {:?}); completion dropped",
                worker_id,
                item_id,
                state.status,
                state.claim_owner
            );
            return Ok(false);
        }

        tx.execute(
            "UPDATE items
             SET status = ?1, claim_owner = NULL, claim_time = NULL, not_before = NULL,
                 processed_at = ?2, updated_at = ?2
             WHERE id = ?3 AND status = ?4 AND claim_owner = ?5",
            params![
                ItemStatus::Done.to_db_string(),
                now,
                item_id,
                ItemStatus::InProgress.to_db_string(),
                worker_id
            ],
        )?;

        tx.commit()?;
        Ok(true)
    }

    fn mark_failed(
        &mut self,
        item_id: i64,
        worker_id: &str,
        error: &str,
    ) -> StorageResult<Option<ItemStatus>> {
        let now = Utc::now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let state = load_outcome_state(&tx, item_id)?;
        if !state.claimed_by(worker_id) {
            tracing::warn!(
                "Worker {} no longer holds item {} ({}, owner {:?}); failure dropped",
                worker_id,
                item_id,
                state.status,
                state.claim_owner
            );
            return Ok(None);
        }

        let next = apply_failure(
            &tx,
            &self.policy,
            item_id,
            state.retry_count,
            state.max_retries,
            error,
            now,
        )?;

        tx.commit()?;

        if next == ItemStatus::Failed {
            tracing::warn!(
                "Item {} failed terminally after {} attempts: {}",
                item_id,
                state.retry_count + 1,
                error
            );
        }
        Ok(Some(next))
    }

    fn reclaim_stale(&mut self, older_than: Duration) -> StorageResult<Vec<i64>> {
        let now = Utc::now();
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return Ok(Vec::new());
        };

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stale: Vec<(i64, u32, u32, String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, retry_count, max_retries, claim_owner, claim_time
                 FROM items
                 WHERE status = ?1 AND claim_time < ?2
                 ORDER BY claim_time ASC",
            )?;
            let rows = stmt
                .query_map(
                    params![
                        ItemStatus::InProgress.to_db_string(),
                        format_timestamp(cutoff)
                    ],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                        ))
                    },
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut reclaimed = Vec::with_capacity(stale.len());
        for (item_id, retry_count, max_retries, owner, claimed_at) in stale {
            let error = format!("lease expired: claimed by {} at {}", owner, claimed_at);
            let next = apply_failure(
                &tx,
                &self.policy,
                item_id,
                retry_count,
                max_retries,
                &error,
                now,
            )?;
            tracing::info!(
                "Reclaimed item {} from {} (now {})",
                item_id,
                owner,
                next
            );
            reclaimed.push(item_id);
        }

        tx.commit()?;
        Ok(reclaimed)
    }

    // ===== Metrics =====

    fn record(&mut self, observation: &WorkerObservation) -> StorageResult<String> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let last: Option<String> = tx.query_row(
            "SELECT MAX(observed_at) FROM worker_observations WHERE worker_id = ?1",
            params![observation.worker_id],
            |row| row.get(0),
        )?;

        let mut observed_at = Utc::now();
        if let Some(last) = last.as_deref().and_then(parse_timestamp) {
            if observed_at <= last {
                observed_at = last + chrono::Duration::microseconds(1);
            }
        }
        let observed_at = format_timestamp(observed_at);

        tx.execute(
            "INSERT INTO worker_observations
             (worker_id, processed_count, failed_count, frontier_enqueued,
              avg_latency_ms, p95_latency_ms, queue_depth, observed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                observation.worker_id,
                observation.processed_count as i64,
                observation.failed_count as i64,
                observation.frontier_enqueued as i64,
                observation.avg_latency_ms,
                observation.p95_latency_ms,
                observation.queue_depth as i64,
                observed_at
            ],
        )?;

        tx.commit()?;
        Ok(observed_at)
    }

    fn observations(&self, worker_id: Option<&str>) -> StorageResult<Vec<ObservationRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM worker_observations
             WHERE ?1 IS NULL OR worker_id = ?1
             ORDER BY observed_at ASC, id ASC",
            OBSERVATION_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![worker_id], row_to_observation)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn latest_observations(&self) -> StorageResult<Vec<ObservationRecord>> {
        // Ids grow with insertion, and each worker's rows are inserted in
        // observed_at order
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM worker_observations
             WHERE id IN (SELECT MAX(id) FROM worker_observations GROUP BY worker_id)
             ORDER BY worker_id ASC",
            OBSERVATION_COLUMNS
        ))?;

        let records = stmt
            .query_map([], row_to_observation)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    // ===== Collaborator Write Surfaces =====

    fn save_fetch_result(&mut self, item_id: i64, fetch: &FetchRecord) -> StorageResult<()> {
        let now = format_timestamp(Utc::now());
        self.conn.execute(
            "INSERT INTO fetch_results (item_id, final_url, status_code, content_type, body, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(item_id) DO UPDATE SET
                final_url = excluded.final_url,
                status_code = excluded.status_code,
                content_type = excluded.content_type,
                body = excluded.body,
                fetched_at = excluded.fetched_at",
            params![
                item_id,
                fetch.final_url,
                fetch.status_code,
                fetch.content_type,
                fetch.body,
                now
            ],
        )?;
        Ok(())
    }

    fn save_extraction(
        &mut self,
        item_id: i64,
        extraction: &ExtractionRecord,
    ) -> StorageResult<()> {
        let now = format_timestamp(Utc::now());
        let payload = serde_json::to_string(&extraction.payload)?;
        self.conn.execute(
            "INSERT INTO extractions (item_id, schema_name, payload, confidence, relevance_score, extracted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(item_id) DO UPDATE SET
                schema_name = excluded.schema_name,
                payload = excluded.payload,
                confidence = excluded.confidence,
                relevance_score = excluded.relevance_score,
                extracted_at = excluded.extracted_at",
            params![
                item_id,
                extraction.schema_name,
                payload,
                extraction.confidence,
                extraction.relevance_score,
                now
            ],
        )?;
        Ok(())
    }

    // ===== Queries =====

    fn get_item(&self, item_id: i64) -> StorageResult<ItemRecord> {
        load_item(&self.conn, item_id)
    }

    fn get_item_by_url(&self, url: &str) -> StorageResult<Option<ItemRecord>> {
        let Ok(url) = canonicalize_url(url) else {
            return Ok(None);
        };

        let item = self
            .conn
            .query_row(
                &format!("SELECT {} FROM items WHERE url = ?1", ITEM_COLUMNS),
                params![url.as_str()],
                row_to_item,
            )
            .optional()?;

        Ok(item)
    }

    fn count_by_status(&self, status: ItemStatus) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM items WHERE status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_total(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn queue_depth(&self) -> StorageResult<u64> {
        let now = format_timestamp(Utc::now());
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM items
             WHERE status = ?1
               AND retry_count < max_retries
               AND (not_before IS NULL OR not_before <= ?2)",
            params![ItemStatus::Pending.to_db_string(), now],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn terminal_failures(&self, limit: usize) -> StorageResult<Vec<ItemRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM items WHERE status = ?1 ORDER BY updated_at DESC, id DESC LIMIT ?2",
            ITEM_COLUMNS
        ))?;

        let items = stmt
            .query_map(
                params![ItemStatus::Failed.to_db_string(), limit as i64],
                row_to_item,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items)
    }
}
