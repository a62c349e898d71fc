//! URL handling module for Pricecrawl
//!
//! This module provides URL normalization (the dedup key for link-following
//! work units) and the scope filter that decides which discovered links are
//! crawled at all.

mod normalize;
mod scope;

// Re-export main functions
pub use normalize::{normalize_parsed, normalize_url};
pub use scope::{extract_domain, ScopeFilter};
