//! Statistics generation from the queue database
//!
//! This module provides functionality for extracting and displaying
//! queue statistics from the storage layer.

use crate::state::ItemStatus;
use crate::storage::{FrontierStore, ItemRecord, ObservationRecord};
use crate::StashyError;
use std::collections::BTreeMap;

/// Number of terminal failures listed in the report
const RECENT_FAILURES: usize = 10;

/// Queue statistics summary
#[derive(Debug, Clone)]
pub struct QueueStatistics {
    /// Total number of items ever discovered
    pub total_items: u64,

    /// Count of items by status, in lifecycle order
    pub items_by_status: Vec<(ItemStatus, u64)>,

    /// Items a claim could hand out right now
    pub queue_depth: u64,

    /// Most recent terminal failures with their last error
    pub recent_failures: Vec<ItemRecord>,

    /// Latest observation per worker, keyed by worker id
    pub latest_observations: BTreeMap<String, ObservationRecord>,
}

impl QueueStatistics {
    pub fn count(&self, status: ItemStatus) -> u64 {
        self.items_by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The storage backend to query
///
/// # Returns
///
/// * `Ok(QueueStatistics)` - Successfully loaded statistics
/// * `Err(StashyError)` - Failed to query statistics
pub fn load_statistics(store: &dyn FrontierStore) -> Result<QueueStatistics, StashyError> {
    let total_items = store.count_total()?;

    let mut items_by_status = Vec::new();
    for status in ItemStatus::all_statuses() {
        items_by_status.push((status, store.count_by_status(status)?));
    }

    let queue_depth = store.queue_depth()?;
    let recent_failures = store.terminal_failures(RECENT_FAILURES)?;

    let latest_observations = store
        .latest_observations()?
        .into_iter()
        .map(|record| (record.observation.worker_id.clone(), record))
        .collect();

    Ok(QueueStatistics {
        total_items,
        items_by_status,
        queue_depth,
        recent_failures,
        latest_observations,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &QueueStatistics) {
    println!("=== Queue Statistics ===\n");

    println!("Overview:");
    println!("  Total items: {}", stats.total_items);
    println!("  Claimable now: {}", stats.queue_depth);
    println!();

    println!("Items by Status:");
    for (status, count) in &stats.items_by_status {
        let percentage = if stats.total_items > 0 {
            (*count as f64 / stats.total_items as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!();

    if !stats.recent_failures.is_empty() {
        println!("Recent Terminal Failures:");
        for item in &stats.recent_failures {
            println!(
                "  - {} (retries {}/{}): {}",
                item.url,
                item.retry_count,
                item.max_retries,
                item.last_error.as_deref().unwrap_or("unknown error")
            );
        }
        println!();
    }

    if !stats.latest_observations.is_empty() {
        println!("Workers ({}):", stats.latest_observations.len());
        for (worker_id, record) in &stats.latest_observations {
            let obs = &record.observation;
            println!(
                "  - {}: processed={} failed={} enqueued={} avg={:.1}ms p95={:.1}ms depth={} at {}",
                worker_id,
                obs.processed_count,
                obs.failed_count,
                obs.frontier_enqueued,
                obs.avg_latency_ms,
                obs.p95_latency_ms,
                obs.queue_depth,
                record.observed_at
            );
        }
        println!();
    }

    let done = stats.count(ItemStatus::Done);
    let finished = done + stats.count(ItemStatus::Failed);
    let success_rate = if finished > 0 {
        (done as f64 / finished as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} finished items done)",
        success_rate, done, finished
    );
}
