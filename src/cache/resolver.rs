use crate::cache::{ArtifactCache, CacheResult, FetchOutcome, LiveFetch};
use crate::crawler::extract_links;
use crate::frontier::WorkUnit;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Where a resolved unit's content came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFrom {
    LinkCache,
    ContentCache,
    Live,
}

/// Result of resolving one work unit
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Links served straight from the links file; content was not read
    Links(Vec<String>),

    /// Content is available, along with the links derived from it
    Content {
        content: Vec<u8>,
        links: Vec<String>,
        from: ResolvedFrom,
    },

    /// Nothing usable could be obtained (rejected status or retries exhausted)
    Empty { reason: String },
}

impl Resolution {
    pub fn links(&self) -> &[String] {
        match self {
            Resolution::Links(links) | Resolution::Content { links, .. } => links.as_slice(),
            Resolution::Empty { .. } => &[],
        }
    }

    pub fn content(&self) -> Option<&[u8]> {
        match self {
            Resolution::Content { content, .. } => Some(content.as_slice()),
            _ => None,
        }
    }

    pub fn resolved_from(&self) -> Option<ResolvedFrom> {
        match self {
            Resolution::Links(_) => Some(ResolvedFrom::LinkCache),
            Resolution::Content { from, .. } => Some(*from),
            Resolution::Empty { .. } => None,
        }
    }
}

/// Three-tier resolution of a unit into content and links
///
/// 1. Links file (only when links are tracked)
/// 2. Cached content
/// 3. Live fetch, persisted before returning
pub struct Resolver {
    cache: ArtifactCache,
    live: Arc<dyn LiveFetch>,
    track_links: bool,
}

impl Resolver {
    /// Creates a resolver
    ///
    /// # Arguments
    ///
    /// * `cache` - Artifact store shared with the rest of the run
    /// * `live` - Fallback used on a full cache miss
    /// * `track_links` - Link-following mode: derive, persist and short-circuit on link lists
    pub fn new(cache: ArtifactCache, live: Arc<dyn LiveFetch>, track_links: bool) -> Self {
        Self {
            cache,
            live,
            track_links,
        }
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Resolves a unit, going live only on a full cache miss
    pub async fn resolve(&self, unit: &WorkUnit) -> CacheResult<Resolution> {
        if let Some(resolution) = self.resolve_cached(unit)? {
            return Ok(resolution);
        }

        match self.live.fetch(unit).await {
            FetchOutcome::Found(content) => {
                self.cache.write_content(unit, &content)?;
                let links = self.derive_and_store_links(unit, &content)?;
                Ok(Resolution::Content {
                    content,
                    links,
                    from: ResolvedFrom::Live,
                })
            }
            FetchOutcome::Rejected(status) => {
                debug!("{} answered {}", unit.key(), status);
                Ok(Resolution::Empty {
                    reason: format!("HTTP {}", status),
                })
            }
            FetchOutcome::Transient(reason) => {
                warn!("Giving up on {}: {}", unit.key(), reason);
                Ok(Resolution::Empty { reason })
            }
        }
    }

    /// Resolves a unit from durable storage only
    ///
    /// Returns `None` on a full miss; never touches the network.
    pub fn resolve_cached(&self, unit: &WorkUnit) -> CacheResult<Option<Resolution>> {
        if self.track_links {
            if let Some(links) = self.cache.read_links(unit)? {
                debug!("Link cache hit for {} ({} links)", unit.key(), links.len());
                return Ok(Some(Resolution::Links(links)));
            }
        }

        match self.cache.read_content(unit)? {
            Some(content) => {
                let links = self.derive_and_store_links(unit, &content)?;
                Ok(Some(Resolution::Content {
                    content,
                    links,
                    from: ResolvedFrom::ContentCache,
                }))
            }
            None => Ok(None),
        }
    }

    fn derive_and_store_links(&self, unit: &WorkUnit, content: &[u8]) -> CacheResult<Vec<String>> {
        if !self.track_links {
            return Ok(Vec::new());
        }

        let links = match Url::parse(unit.key()) {
            Ok(base) => extract_links(&String::from_utf8_lossy(content), &base),
            Err(_) => Vec::new(),
        };
        self.cache.write_links(unit, &links)?;
        Ok(links)
    }
}
