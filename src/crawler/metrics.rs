//! Per-worker throughput and latency tracking
//!
//! Counters are cumulative for the worker's lifetime. Latency statistics
//! cover the most recent [`LATENCY_WINDOW`] items.

use crate::storage::WorkerObservation;
use std::collections::VecDeque;
use std::time::Duration;

/// Number of recent item latencies kept for avg/p95
pub const LATENCY_WINDOW: usize = 512;

/// Running totals for one worker, flushed periodically as observations
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    worker_id: String,
    processed: u64,
    failed: u64,
    enqueued: u64,
    latencies_ms: VecDeque<f64>,
    since_flush: u64,
}

impl WorkerMetrics {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            processed: 0,
            failed: 0,
            enqueued: 0,
            latencies_ms: VecDeque::with_capacity(LATENCY_WINDOW),
            since_flush: 0,
        }
    }

    /// Records an item that was completed
    pub fn record_success(&mut self, latency: Duration, enqueued: u64) {
        self.processed += 1;
        self.enqueued += enqueued;
        self.push_latency(latency);
    }

    /// Records an item whose attempt failed
    pub fn record_failure(&mut self, latency: Duration) {
        self.failed += 1;
        self.push_latency(latency);
    }

    fn push_latency(&mut self, latency: Duration) {
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency.as_secs_f64() * 1000.0);
        self.since_flush += 1;
    }

    /// True once `every` items have been handled since the last flush
    pub fn flush_due(&self, every: u64) -> bool {
        self.since_flush >= every.max(1)
    }

    /// True if anything was handled since the last flush
    pub fn has_unflushed(&self) -> bool {
        self.since_flush > 0
    }

    pub fn mark_flushed(&mut self) {
        self.since_flush = 0;
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued
    }

    /// Builds the observation to persist
    pub fn snapshot(&self, queue_depth: u64) -> WorkerObservation {
        let samples: Vec<f64> = self.latencies_ms.iter().copied().collect();
        WorkerObservation {
            worker_id: self.worker_id.clone(),
            processed_count: self.processed,
            failed_count: self.failed,
            frontier_enqueued: self.enqueued,
            avg_latency_ms: mean(&samples),
            p95_latency_ms: p95(&samples),
            queue_depth,
        }
    }
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Nearest-rank 95th percentile: `sorted[floor(0.95 * (n - 1))]`
pub fn p95(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = (0.95 * (sorted.len() - 1) as f64).floor() as usize;
    sorted[idx]
}
