//! Queue worker: claim, fetch, score, expand, record
//!
//! A worker owns its own store connection and never shares in-memory state
//! with other workers; every bit of coordination goes through the store.
//! Per claimed item the worker:
//! 1. Fetches the page and saves the raw result
//! 2. Parses and scores it and saves the extraction
//! 3. Merges outgoing links that clear the relevance threshold
//! 4. Marks the item done, or failed if fetching or parsing went wrong
//!
//! Store errors are never swallowed per item. They abort the batch and
//! surface to the loop, which owns the retry policy for the store itself.

use crate::config::{Config, FrontierConfig};
use crate::crawler::fetcher::PageFetcher;
use crate::crawler::metrics::WorkerMetrics;
use crate::crawler::parser::parse_html;
use crate::crawler::scoring::{frontier_candidates, RelevanceScorer};
use crate::frontier::{clamp_relevance, DiscoveredLink};
use crate::state::ItemStatus;
use crate::storage::{ExtractionRecord, FrontierStore, ItemRecord, StorageError, StorageResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use url::Url;

/// Schema name stored with every extraction this worker writes
const EXTRACTION_SCHEMA: &str = "page-signals/v1";

/// Knobs for a single worker
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub worker_id: String,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub metrics_flush_every: u64,
    pub frontier: FrontierConfig,
}

impl WorkerSettings {
    pub fn from_config(config: &Config, worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            batch_size: config.queue.batch_size,
            poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
            metrics_flush_every: config.worker.metrics_flush_every,
            frontier: config.frontier.clone(),
        }
    }
}

/// What happened to one claimed item
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Done { enqueued: u64 },
    Failed { status: ItemStatus, error: String },
    /// The lease expired and the item moved on before the outcome was
    /// reported; nothing was recorded
    ClaimLost,
}

/// Totals from a `run_until_idle` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: u64,
    pub processed: u64,
    pub failed: u64,
    pub enqueued: u64,
    pub lost: u64,
}

/// A single queue consumer
pub struct Worker<S: FrontierStore> {
    store: S,
    fetcher: Arc<dyn PageFetcher>,
    scorer: Arc<dyn RelevanceScorer>,
    settings: WorkerSettings,
    metrics: WorkerMetrics,
}

fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

impl<S: FrontierStore> Worker<S> {
    pub fn new(
        store: S,
        fetcher: Arc<dyn PageFetcher>,
        scorer: Arc<dyn RelevanceScorer>,
        settings: WorkerSettings,
    ) -> Self {
        let metrics = WorkerMetrics::new(settings.worker_id.clone());
        Self {
            store,
            fetcher,
            scorer,
            settings,
            metrics,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.settings.worker_id
    }

    pub fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Claims one batch and processes all of it
    ///
    /// Returns the outcome of every claimed item, in claim order. An empty
    /// result means nothing was eligible.
    pub async fn run_once(&mut self) -> StorageResult<Vec<(i64, ItemOutcome)>> {
        let batch = self
            .store
            .claim(&self.settings.worker_id, self.settings.batch_size)?;

        let mut outcomes = Vec::with_capacity(batch.len());
        for item in &batch {
            let outcome = self.handle_item(item).await?;
            outcomes.push((item.id, outcome));
        }

        Ok(outcomes)
    }

    /// Processes batches until a claim comes back empty
    pub async fn run_until_idle(&mut self) -> StorageResult<RunSummary> {
        let mut summary = RunSummary::default();

        loop {
            let outcomes = self.run_once().await?;
            if outcomes.is_empty() {
                break;
            }

            summary.batches += 1;
            for (_, outcome) in outcomes {
                match outcome {
                    ItemOutcome::Done { enqueued } => {
                        summary.processed += 1;
                        summary.enqueued += enqueued;
                    }
                    ItemOutcome::Failed { .. } => summary.failed += 1,
                    ItemOutcome::ClaimLost => summary.lost += 1,
                }
            }
        }

        self.flush_metrics()?;
        tracing::info!(
            "Worker {} idle: {} processed, {} failed, {} enqueued",
            self.settings.worker_id,
            summary.processed,
            summary.failed,
            summary.enqueued
        );
        Ok(summary)
    }

    /// Polls the queue until `shutdown` flips to true
    ///
    /// Claims still held when shutdown arrives mid-batch are left to the
    /// lease sweep.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> StorageResult<()> {
        tracing::info!(
            "Worker {} starting, batch_size={}",
            self.settings.worker_id,
            self.settings.batch_size
        );

        while !shutdown_requested(&shutdown) {
            let claimed = self
                .store
                .claim(&self.settings.worker_id, self.settings.batch_size);

            let batch = match claimed {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!("Worker {} claim failed: {}", self.settings.worker_id, e);
                    Vec::new()
                }
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            for (idx, item) in batch.iter().enumerate() {
                if shutdown_requested(&shutdown) {
                    tracing::info!(
                        "Worker {} stopping with {} claimed items unprocessed",
                        self.settings.worker_id,
                        batch.len() - idx
                    );
                    break;
                }

                if let Err(e) = self.handle_item(item).await {
                    tracing::error!(
                        "Worker {} store error on item {}: {}",
                        self.settings.worker_id,
                        item.id,
                        e
                    );
                    tokio::time::sleep(self.settings.poll_interval).await;
                    break;
                }
            }
        }

        self.flush_metrics()?;
        tracing::info!(
            "Worker {} stopped: {} processed, {} failed, {} enqueued",
            self.settings.worker_id,
            self.metrics.processed(),
            self.metrics.failed(),
            self.metrics.enqueued()
        );
        Ok(())
    }

    async fn handle_item(&mut self, item: &ItemRecord) -> StorageResult<ItemOutcome> {
        let started = Instant::now();
        let outcome = self.process_item(item).await?;

        match &outcome {
            ItemOutcome::Done { enqueued } => {
                self.metrics.record_success(started.elapsed(), *enqueued);
                tracing::info!(
                    "Done {} (item {}, +{} frontier)",
                    item.url,
                    item.id,
                    enqueued
                );
            }
            ItemOutcome::Failed { status, error } => {
                self.metrics.record_failure(started.elapsed());
                tracing::warn!("Failed {} (item {}, now {}): {}", item.url, item.id, status, error);
            }
            ItemOutcome::ClaimLost => {
                tracing::warn!(
                    "Lost claim on {} (item {}) before reporting its outcome",
                    item.url,
                    item.id
                );
            }
        }

        if self.metrics.flush_due(self.settings.metrics_flush_every) {
            self.flush_metrics()?;
        }

        Ok(outcome)
    }

    async fn process_item(&mut self, item: &ItemRecord) -> StorageResult<ItemOutcome> {
        let fetched = self.fetcher.fetch(&item.url).await;

        let page = match fetched {
            Ok(page) => page,
            Err(e) => return self.fail(item, e.to_string()),
        };

        self.store.save_fetch_result(item.id, &page.to_record())?;

        // Links resolve against where the page actually lives after redirects
        let base = match Url::parse(&page.final_url).or_else(|_| Url::parse(&item.url)) {
            Ok(base) => base,
            Err(e) => return self.fail(item, format!("Unusable page URL: {}", e)),
        };

        let parsed = match parse_html(&page.body, &base, self.settings.frontier.max_links) {
            Ok(parsed) => parsed,
            Err(e) => return self.fail(item, e),
        };

        let signals = self.scorer.page_signals(&base, &parsed);
        let page_score = clamp_relevance(signals.aggregate());

        let extraction = ExtractionRecord {
            schema_name: Some(EXTRACTION_SCHEMA.to_string()),
            payload: serde_json::json!({
                "title": parsed.title,
                "description": parsed.description,
                "published": parsed.published,
                "link_count": parsed.links.len(),
                "signals": {
                    "topic_density": signals.topic_density,
                    "freshness": signals.freshness,
                    "structured_data": signals.structured_data,
                    "link_quality": signals.link_quality,
                },
            }),
            confidence: None,
            relevance_score: page_score,
        };
        self.store.save_extraction(item.id, &extraction)?;

        let candidates = frontier_candidates(
            self.scorer.as_ref(),
            &base,
            &parsed,
            page_score,
            item.depth,
            &self.settings.frontier,
        );

        let mut enqueued = 0;
        for candidate in candidates
            .iter()
            .filter(|c| c.relevance_score >= self.settings.frontier.relevance_threshold)
        {
            let link = DiscoveredLink::discovered(
                item.id,
                candidate.url.as_str(),
                candidate.priority,
                candidate.relevance_score,
                i64::from(item.depth) + 1,
            );

            match self.store.merge(&link) {
                Ok(outcome) if outcome.inserted() => enqueued += 1,
                Ok(_) => {}
                Err(StorageError::InvalidUrl(e)) => {
                    tracing::debug!("Skipping candidate from item {}: {}", item.id, e);
                }
                Err(e) => return Err(e),
            }
        }

        if self.store.mark_done(item.id, &self.settings.worker_id)? {
            Ok(ItemOutcome::Done { enqueued })
        } else {
            Ok(ItemOutcome::ClaimLost)
        }
    }

    fn fail(&mut self, item: &ItemRecord, error: String) -> StorageResult<ItemOutcome> {
        match self
            .store
            .mark_failed(item.id, &self.settings.worker_id, &error)?
        {
            Some(status) => Ok(ItemOutcome::Failed { status, error }),
            None => Ok(ItemOutcome::ClaimLost),
        }
    }

    /// Writes an observation if anything happened since the last one
    fn flush_metrics(&mut self) -> StorageResult<()> {
        if !self.metrics.has_unflushed() {
            return Ok(());
        }

        let queue_depth = self.store.queue_depth()?;
        let observation = self.metrics.snapshot(queue_depth);
        let observed_at = self.store.record(&observation)?;
        self.metrics.mark_flushed();

        tracing::debug!(
            "Worker {} observation at {}: processed={} failed={} p95={:.1}ms depth={}",
            observation.worker_id,
            observed_at,
            observation.processed_count,
            observation.failed_count,
            observation.p95_latency_ms,
            observation.queue_depth
        );
        Ok(())
    }
}
