//! Crawler module: live fetching, site navigation and worker supervision
//!
//! This module contains the core crawling logic, including:
//! - HTTP and browser-backed live fetchers with retry logic
//! - HTML link extraction and CSS-selected anchors
//! - Navigation strategies and record extractors
//! - The worker state machine and restart policy
//! - Overall run coordination and progress reporting

mod coordinator;
mod fetcher;
mod parser;
mod progress;
mod strategy;
mod supervisor;

pub use coordinator::{describe_plan, has_previous_state, run_crawl, Coordinator};
pub use fetcher::{build_http_client, AgentFetcher, HttpFetcher};
pub use parser::{extract_links, select_anchors, Anchor};
pub use progress::{Progress, RunSummary};
pub use strategy::{
    poll_until, wait_for_script, wait_until_ready, ExtractError, Extractor, JsonLdExtractor,
    NavigationStrategy, PageKind, Record, SelectorStrategy,
};
pub use supervisor::{
    AttemptOutcome, LinkWorker, PartitionSupervisor, SupervisorSettings, SupervisorState,
    WorkerContext,
};
