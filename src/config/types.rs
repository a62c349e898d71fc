use serde::Deserialize;

/// Main configuration structure for Pricecrawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Which frontier drives the run
    pub mode: CrawlMode,
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    pub output: OutputConfig,
    /// Link-following scope (required in link mode)
    pub scope: Option<ScopeConfig>,
    /// Site navigation (required in partition mode)
    pub site: Option<SiteConfig>,
}

/// Frontier strategy for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    /// Follow links from a start URL through a scope filter
    Link,
    /// Hand out a fixed list of named categories, one supervisor each
    Partition,
}

/// Worker and budget configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Number of concurrent workers
    pub workers: u32,

    /// Global item budget for the run (0 = unlimited)
    #[serde(default)]
    pub limit: u64,

    /// Wait before restarting a failed partition (milliseconds)
    #[serde(rename = "cooldown-ms", default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Start offset per worker index (milliseconds)
    #[serde(rename = "stagger-ms", default = "default_stagger_ms")]
    pub stagger_ms: u64,

    /// Restarts allowed per partition (0 = unlimited)
    #[serde(rename = "max-restarts", default)]
    pub max_restarts: u32,

    /// Consecutive restarts without progress before a stall warning
    #[serde(rename = "stall-threshold", default = "default_stall_threshold")]
    pub stall_threshold: u32,

    /// Link mode: attempts per unit before it is dropped
    #[serde(rename = "max-unit-attempts", default = "default_max_unit_attempts")]
    pub max_unit_attempts: u32,
}

/// Live HTTP fetch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Retries on 5xx and timeouts
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Exponential backoff base (milliseconds)
    #[serde(rename = "backoff-base-ms", default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Per-request timeout (milliseconds)
    #[serde(rename = "timeout-ms", default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// User agent sent with live fetches and browser sessions
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// How link mode retrieves pages on a cache miss
    #[serde(default)]
    pub backend: FetchBackend,
}

/// Live retrieval mechanism for link mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchBackend {
    /// Plain GET requests
    #[default]
    Http,
    /// Rendered through a pooled browser session
    Agent,
}

/// Browser automation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub browser: Browser,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// Existing WebDriver endpoint; a local driver is spawned when absent
    pub endpoint: Option<String>,

    /// Maximum live sessions (0 = unbounded)
    #[serde(rename = "max-agents", default)]
    pub max_agents: u32,

    /// Bound on a single navigation plus readiness wait (milliseconds)
    #[serde(rename = "page-timeout-ms", default = "default_timeout_ms")]
    pub page_timeout_ms: u64,

    /// Readiness poll interval (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Supported automation browsers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chrome,
    Firefox,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory holding cached artifacts and the state file
    #[serde(rename = "data-dir")]
    pub data_dir: String,

    /// State file name, relative to the data directory
    #[serde(rename = "state-file", default = "default_state_file")]
    pub state_file: String,

    /// Optional JSON-lines file for extracted records
    #[serde(rename = "records-file")]
    pub records_file: Option<String>,
}

/// Link-following scope
#[derive(Debug, Clone, Deserialize)]
pub struct ScopeConfig {
    #[serde(rename = "start-url")]
    pub start_url: String,

    /// Query keys starting with any of these prefixes reject a link
    #[serde(rename = "deny-query-prefixes", default)]
    pub deny_query_prefixes: Vec<String>,

    /// Admitted path prefixes
    pub allow: Vec<AllowEntry>,
}

/// One admitted path prefix with the number of segments allowed below it
#[derive(Debug, Clone, Deserialize)]
pub struct AllowEntry {
    pub prefix: String,

    #[serde(rename = "max-depth", default)]
    pub max_depth: u32,
}

/// Selector-driven site navigation for partition mode
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(rename = "start-url")]
    pub start_url: String,

    /// Element whose presence marks a listing page as loaded
    #[serde(rename = "ready-selector")]
    pub ready_selector: String,

    /// Anchors leading to child work units (products)
    #[serde(rename = "child-selector")]
    pub child_selector: String,

    /// Element whose presence marks a product page as loaded
    #[serde(rename = "detail-ready-selector")]
    pub detail_ready_selector: Option<String>,

    /// Clickable element advancing to the next listing page
    #[serde(rename = "next-page-selector")]
    pub next_page_selector: Option<String>,

    /// Anchors used to discover partitions when none are configured
    #[serde(rename = "partition-selector")]
    pub partition_selector: Option<String>,

    #[serde(default)]
    pub partitions: Vec<PartitionEntry>,
}

/// A named category crawled by one supervisor
#[derive(Debug, Clone, Deserialize)]
pub struct PartitionEntry {
    pub name: String,
    pub url: String,

    /// Breadcrumb labels; defaults to the name alone
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            backend: FetchBackend::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            browser: Browser::default(),
            headless: true,
            endpoint: None,
            max_agents: 0,
            page_timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_cooldown_ms() -> u64 {
    5000
}

fn default_stagger_ms() -> u64 {
    1000
}

fn default_stall_threshold() -> u32 {
    10
}

fn default_max_unit_attempts() -> u32 {
    3
}

fn default_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36".to_string()
}

fn default_state_file() -> String {
    "crawler_state.json".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// True when the run needs browser sessions
    pub fn uses_agents(&self) -> bool {
        self.mode == CrawlMode::Partition || self.fetch.backend == FetchBackend::Agent
    }

    /// Absolute-or-relative path of the crawl state file
    pub fn state_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.output.data_dir).join(&self.output.state_file)
    }

    /// Path of the records file, if one is configured
    pub fn records_path(&self) -> Option<std::path::PathBuf> {
        self.output
            .records_file
            .as_ref()
            .map(|f| std::path::Path::new(&self.output.data_dir).join(f))
    }
}

impl CrawlerConfig {
    pub fn cooldown(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cooldown_ms)
    }

    pub fn stagger(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stagger_ms)
    }
}

impl AgentConfig {
    pub fn page_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.page_timeout_ms)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}

impl PartitionEntry {
    /// Breadcrumb labels, falling back to the partition name
    pub fn breadcrumb(&self) -> Vec<String> {
        if self.labels.is_empty() {
            vec![self.name.clone()]
        } else {
            self.labels.clone()
        }
    }
}
