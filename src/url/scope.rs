use crate::config::ScopeConfig;
use crate::UrlError;
use url::Url;

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use pricecrawl::url::extract_domain;
///
/// let url = Url::parse("https://WWW.Kupi.cz/slevy").unwrap();
/// assert_eq!(extract_domain(&url), Some("www.kupi.cz".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// An admitted path prefix, pre-split into segments
#[derive(Debug, Clone)]
struct AllowRule {
    segments: Vec<String>,
    max_depth: usize,
}

/// Predicate deciding whether a discovered link belongs to the crawl
///
/// A URL is admitted when all of the following hold:
/// 1. Its host equals the host of the start URL
/// 2. Its path begins with one of the allowed prefixes and has at most
///    `max_depth` further segments below that prefix
/// 3. None of its query keys starts with a denied prefix
///
/// Rejections are silent; a rejected link is simply not crawled.
#[derive(Debug, Clone)]
pub struct ScopeFilter {
    host: String,
    allow: Vec<AllowRule>,
    deny_query_prefixes: Vec<String>,
}

impl ScopeFilter {
    /// Creates a filter rooted at `start_url`
    ///
    /// # Arguments
    ///
    /// * `start_url` - Seed URL; only links on its host are admitted
    /// * `allow` - `(prefix, max_depth)` pairs, prefix given as `a/b` without slashes
    /// * `deny_query_prefixes` - Query key prefixes that reject a link
    pub fn new(
        start_url: &Url,
        allow: &[(String, u32)],
        deny_query_prefixes: &[String],
    ) -> Result<Self, UrlError> {
        let host = extract_domain(start_url).ok_or(UrlError::MissingDomain)?;

        let allow = allow
            .iter()
            .map(|(prefix, depth)| AllowRule {
                segments: split_segments(prefix),
                max_depth: *depth as usize,
            })
            .collect();

        Ok(Self {
            host,
            allow,
            deny_query_prefixes: deny_query_prefixes.to_vec(),
        })
    }

    /// Builds the filter from the `[scope]` configuration section
    pub fn from_config(config: &ScopeConfig) -> Result<Self, UrlError> {
        let start = Url::parse(&config.start_url).map_err(|e| UrlError::Parse(e.to_string()))?;
        let allow: Vec<(String, u32)> = config
            .allow
            .iter()
            .map(|entry| (entry.prefix.clone(), entry.max_depth))
            .collect();

        Self::new(&start, &allow, &config.deny_query_prefixes)
    }

    /// Returns true if the URL is inside the crawl scope
    pub fn admits(&self, url: &Url) -> bool {
        if extract_domain(url).as_deref() != Some(self.host.as_str()) {
            return false;
        }

        if self.has_denied_query_key(url) {
            return false;
        }

        let segments = split_segments(url.path());
        self.allow.iter().any(|rule| rule.matches(&segments))
    }

    fn has_denied_query_key(&self, url: &Url) -> bool {
        url.query_pairs().any(|(key, _)| {
            self.deny_query_prefixes
                .iter()
                .any(|prefix| key.starts_with(prefix.as_str()))
        })
    }
}

impl AllowRule {
    fn matches(&self, segments: &[String]) -> bool {
        segments.len() >= self.segments.len()
            && segments.len() - self.segments.len() <= self.max_depth
            && segments.iter().zip(&self.segments).all(|(a, b)| a == b)
    }
}

fn split_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
