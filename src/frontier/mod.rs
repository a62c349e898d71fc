//! Frontier module: the stream of work units handed to workers
//!
//! Two interchangeable strategies implement [`Frontier`]:
//!
//! - [`LinkFrontier`]: FIFO link-following queue with a visited set and a
//!   scope filter; workers submit the links they discover
//! - [`PartitionFrontier`]: a fixed list of named categories, each handed out
//!   once to a supervisor that owns its whole traversal

mod link;
mod partition;

pub use link::LinkFrontier;
pub use partition::PartitionFrontier;

use crate::url::normalize_parsed;
use crate::UrlResult;
use async_trait::async_trait;
use url::Url;

/// One addressable piece of crawl work
///
/// `id` is the dedup key (a normalized URL for link targets, the category
/// URL for partitions). `ancestors` is the breadcrumb used to rebuild the
/// category tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    id: String,
    ancestors: Vec<String>,
}

impl WorkUnit {
    pub fn new(id: impl Into<String>, ancestors: Vec<String>) -> Self {
        Self {
            id: id.into(),
            ancestors,
        }
    }

    /// Creates a link-following unit keyed by the normalized URL
    ///
    /// The breadcrumb is the URL's path segments, so the tree mirrors the
    /// site's section layout.
    pub fn from_url(url: &Url) -> UrlResult<Self> {
        let normalized = normalize_parsed(url.clone())?;
        let ancestors = normalized
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            id: normalized.to_string(),
            ancestors,
        })
    }

    /// Parses and normalizes a URL string into a unit
    pub fn parse(url: &str) -> UrlResult<Self> {
        let url = Url::parse(url).map_err(|e| crate::UrlError::Parse(e.to_string()))?;
        Self::from_url(&url)
    }

    /// Replaces the breadcrumb, e.g. to file a product under its category
    pub fn with_ancestors(mut self, ancestors: Vec<String>) -> Self {
        self.ancestors = ancestors;
        self
    }

    pub fn key(&self) -> &str {
        &self.id
    }

    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    /// `Root > Leaf` label used in log lines
    pub fn label(&self) -> String {
        if self.ancestors.is_empty() {
            self.id.clone()
        } else {
            self.ancestors.join(" > ")
        }
    }
}

/// Source of work units shared by all workers of a run
#[async_trait]
pub trait Frontier: Send + Sync {
    /// Hands out the next unit, waiting while other workers may still add work
    ///
    /// Returns `None` once the frontier is exhausted or closed.
    async fn next(&self) -> Option<WorkUnit>;

    /// Offers newly discovered units; duplicates and out-of-scope units are dropped
    fn submit(&self, children: Vec<WorkUnit>);

    /// Reports that a unit handed out by [`next`](Frontier::next) is done
    fn finish(&self, unit: &WorkUnit);

    /// Reports a failed attempt; returns true if the unit was queued again
    fn retry(&self, unit: WorkUnit) -> bool {
        self.finish(&unit);
        false
    }

    /// Stops handing out work; pending and future `next` calls return `None`
    fn close(&self);

    /// Units waiting to be handed out
    fn pending(&self) -> usize;
}
