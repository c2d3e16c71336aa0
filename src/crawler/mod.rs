//! Worker runtime around the frontier queue
//!
//! This module contains everything a queue consumer needs, including:
//! - HTTP fetching behind an injectable trait
//! - HTML parsing and link extraction
//! - Relevance scoring and frontier candidate selection
//! - The claim/process loop, its metrics, and the lease sweeper

mod fetcher;
mod metrics;
mod parser;
mod scoring;
mod sweeper;
mod worker;

pub use fetcher::{
    build_http_client, is_html_content_type, FetchError, FetchedPage, HttpFetcher, PageFetcher,
};
pub use metrics::{p95, WorkerMetrics, LATENCY_WINDOW};
pub use parser::{parse_html, PageLink, ParsedPage};
pub use scoring::{
    frontier_candidates, CandidateReason, KeywordScorer, LinkCandidate, LinkScore, PageSignals,
    RelevanceScorer,
};
pub use sweeper::LeaseSweeper;
pub use worker::{ItemOutcome, RunSummary, Worker, WorkerSettings};
