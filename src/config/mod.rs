//! Configuration module for Stashy
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use stashy::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("stashy.toml")).unwrap();
//! println!("Workers claim {} items at a time", config.queue.batch_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, FrontierConfig, QueueConfig, ScoringConfig, SeedEntry, StorageConfig,
    UserAgentConfig, WorkerConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
