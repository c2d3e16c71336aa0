//! Integration tests for Stashy
//!
//! `queue_tests` drives the SQLite store from several connections at once;
//! `worker_tests` runs workers end-to-end against wiremock servers.

mod queue_tests;
mod worker_tests;
