//! Statistics from a crawl state file
//!
//! Backs the `--stats` flag: loads the state file without touching the
//! network and describes how far the crawl has come.

use crate::config::Config;
use crate::state::{CompletedField, StateResult, StateStore, StateSummary};
use std::fmt::Write;
use std::path::Path;

/// Loads a state file and summarizes it
///
/// # Arguments
///
/// * `config` - The run configuration (state path and mode)
///
/// # Returns
///
/// * `Ok(StateSummary)` - Counts from the file (all zero if it does not exist yet)
/// * `Err(StateError)` - The file exists but is unreadable or corrupt
pub fn load_statistics(config: &Config) -> StateResult<StateSummary> {
    let store = StateStore::open(config.state_path(), CompletedField::from(config.mode))?;
    Ok(store.summary())
}

/// Formats a summary for the terminal
pub fn render_statistics(path: &Path, summary: &StateSummary) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "=== Crawl Statistics ===\n");
    let _ = writeln!(out, "State file: {}", path.display());
    let _ = writeln!(out, "  Completed units: {}", summary.completed);
    let _ = writeln!(out, "  Category tree nodes: {}", summary.tree_nodes);

    if summary.top_labels.is_empty() {
        let _ = writeln!(out, "\nNo categories recorded yet");
    } else {
        let _ = writeln!(out, "\nTop-level categories ({}):", summary.top_labels.len());
        for label in &summary.top_labels {
            let _ = writeln!(out, "  - {}", label);
        }
    }

    out
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(path: &Path, summary: &StateSummary) {
    print!("{}", render_statistics(path, summary));
}
