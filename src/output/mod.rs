//! Output module for crawl results and reports
//!
//! This module handles:
//! - Appending extracted records as JSON lines
//! - Summarizing a crawl state file for `--stats`

mod records;
pub mod stats;

pub use records::RecordSink;
pub use stats::{load_statistics, print_statistics, render_statistics};
