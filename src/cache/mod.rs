//! Fetch/cache layer
//!
//! Turns a work unit into content, reusing previously captured pages and
//! previously extracted links before doing any network or browser work.
//!
//! # Components
//!
//! - `ArtifactCache`: gzip content files plus newline-delimited link files
//! - `Resolver`: links file, then content file, then live fetch
//! - `LiveFetch`: the network seam, implemented over HTTP and over pooled agents

mod artifact;
mod resolver;

pub use artifact::{artifact_name, ArtifactCache, ArtifactMeta, ArtifactPaths};
pub use resolver::{Resolution, ResolvedFrom, Resolver};

use crate::frontier::WorkUnit;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while reading or writing artifacts
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode artifact metadata: {0}")]
    Encode(String),
}

impl CacheError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Outcome of one live fetch, retries included
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Content retrieved
    Found(Vec<u8>),

    /// The site answered with a non-retryable status
    Rejected(u16),

    /// Retries exhausted on 5xx, timeouts or connection errors
    Transient(String),
}

/// Live retrieval of a unit's content
#[async_trait]
pub trait LiveFetch: Send + Sync {
    async fn fetch(&self, unit: &WorkUnit) -> FetchOutcome;
}
