//! State module for frontier items
//!
//! # Components
//!
//! - `ItemStatus`: lifecycle of a queued URL (pending, in progress, done, failed)
//! - `ItemSource`: how an item entered the frontier; `seed` is sticky under merge

mod item_source;
mod item_status;

// Re-export main types
pub use item_source::ItemSource;
pub use item_status::ItemStatus;
