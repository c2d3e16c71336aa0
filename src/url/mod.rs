//! URL handling module for Stashy
//!
//! This module provides the canonical form used as an item's identity in the
//! frontier queue, plus host helpers used when scoring discovered links.

mod domain;
mod normalize;

// Re-export main functions
pub use domain::{extract_host, host_affinity};
pub use normalize::canonicalize_url;
