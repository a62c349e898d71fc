//! Pricecrawl: crash-safe catalog crawl orchestration
//!
//! This crate drives product-and-price acquisition from a small set of catalog
//! sites. Work units (categories, listing pages or link targets) are crawled
//! concurrently with a bounded pool of browser automation sessions, progress is
//! persisted with merge-on-save so several workers and processes can share one
//! state file, and every captured page is cached so restarted work is cheap.

pub mod agent;
pub mod cache;
pub mod config;
pub mod crawler;
pub mod frontier;
pub mod output;
pub mod state;
pub mod url;

use std::time::Duration;
use thiserror::Error;

/// Main error type for Pricecrawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("State error: {0}")]
    State(#[from] state::StateError),

    #[error("Cache error: {0}")]
    Cache(#[from] cache::CacheError),

    #[error("Agent error: {0}")]
    Agent(#[from] agent::AgentError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Navigation to {unit} failed")]
    NavigationFailed { unit: String },

    #[error("Page for {unit} not ready after {waited:?}")]
    ReadyTimeout { unit: String, waited: Duration },

    #[error("No content for {unit}")]
    EmptyContent { unit: String },

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrawlError {
    /// Returns true if the agent that produced this error must not be reused
    pub fn is_agent_fatal(&self) -> bool {
        match self {
            Self::Agent(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid CSS selector: {0}")]
    InvalidSelector(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// Result type alias for Pricecrawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use frontier::{Frontier, LinkFrontier, PartitionFrontier, WorkUnit};
pub use state::{Budget, StateStore};
pub use url::{extract_domain, normalize_url, ScopeFilter};
