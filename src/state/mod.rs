//! State module for tracking per-item crawl progress
//!
//! # Components
//!
//! - `ItemState`: the lifecycle state recorded in the progress ledger for each
//!   work item (in progress, finished, failed)

mod item_state;

// Re-export main types
pub use item_state::ItemState;
