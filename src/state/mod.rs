//! State module for durable crawl progress
//!
//! # Components
//!
//! - `StateStore`: completed units plus the category tree, persisted with merge-on-save
//! - `CategoryTree`: breadcrumb hierarchy with a recursive merge
//! - `Budget`: race-free global item cap shared by every worker

mod budget;
mod store;
mod tree;

use std::path::PathBuf;
use thiserror::Error;

// Re-export main types
pub use budget::Budget;
pub use store::{CompletedField, CrawlState, StateStore, StateSummary};
pub use tree::{CategoryTree, TreeNode};

/// Errors that can occur while loading or saving crawl state
#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("State file {path} is unreadable: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Result type for state operations
pub type StateResult<T> = Result<T, StateError>;
