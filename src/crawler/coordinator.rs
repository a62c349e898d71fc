//! Crawler coordinator - run wiring and worker lifecycle
//!
//! This module builds everything a run shares and drives the workers:
//! - Opening the state store (optionally fresh) and the record sink
//! - Starting or connecting to a WebDriver service and the agent pool
//! - Building the frontier for the configured mode
//! - Spawning staggered workers and waiting for them
//! - Shutting down agents, the driver and persisting state

use crate::agent::{AgentFactory, AgentPool, DriverService, WebDriverFactory};
use crate::cache::{ArtifactCache, LiveFetch, Resolver};
use crate::config::{Config, CrawlMode, FetchBackend};
use crate::crawler::fetcher::{AgentFetcher, HttpFetcher};
use crate::crawler::progress::{Progress, RunSummary};
use crate::crawler::strategy::{Extractor, JsonLdExtractor, NavigationStrategy, SelectorStrategy};
use crate::crawler::supervisor::{
    LinkWorker, PartitionSupervisor, SupervisorSettings, SupervisorState, WorkerContext,
};
use crate::frontier::{Frontier, LinkFrontier, PartitionFrontier, WorkUnit};
use crate::output::RecordSink;
use crate::state::{Budget, CompletedField, StateStore};
use crate::url::ScopeFilter;
use crate::{ConfigError, CrawlError, Result};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    ctx: WorkerContext,
    cache: ArtifactCache,
    pool: Option<Arc<AgentPool>>,
    strategy: Option<Arc<dyn NavigationStrategy>>,
    driver: Option<DriverService>,
}

impl Coordinator {
    /// Creates a coordinator from configuration
    ///
    /// When the run needs browser sessions and no endpoint is configured, a
    /// local driver process is started and owned by the coordinator.
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `fresh` - Delete the state file before starting (the artifact cache is kept)
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(CrawlError)` - Failed to initialize
    pub async fn new(config: Config, fresh: bool) -> Result<Self> {
        if !config.uses_agents() {
            return Self::with_factory(config, fresh, None);
        }

        let (endpoint, driver) = match &config.agent.endpoint {
            Some(endpoint) => (endpoint.clone(), None),
            None => {
                let service = DriverService::start(config.agent.browser).await?;
                (service.endpoint().to_string(), Some(service))
            }
        };

        let factory = WebDriverFactory::new(&endpoint, &config.agent, &config.fetch.user_agent)?;
        let mut coordinator = Self::with_factory(config, fresh, Some(Arc::new(factory)))?;
        coordinator.driver = driver;
        Ok(coordinator)
    }

    /// Creates a coordinator with a caller-supplied session factory
    ///
    /// Pass `None` for runs that never open a browser session.
    pub fn with_factory(
        config: Config,
        fresh: bool,
        factory: Option<Arc<dyn AgentFactory>>,
    ) -> Result<Self> {
        let state_path = config.state_path();
        if fresh && StateStore::remove_file(&state_path)? {
            info!("Starting fresh: removed {}", state_path.display());
        }
        let state = StateStore::open(state_path, CompletedField::from(config.mode))?;

        let sink = config
            .records_path()
            .map(RecordSink::open)
            .transpose()?
            .map(Arc::new);

        let pool = factory.map(|factory| {
            Arc::new(AgentPool::new(factory, config.agent.max_agents as usize))
        });

        let strategy = config.site.as_ref().map(|site| {
            Arc::new(SelectorStrategy::new(
                site.clone(),
                config.agent.page_timeout(),
                config.agent.poll_interval(),
            )) as Arc<dyn NavigationStrategy>
        });

        let ctx = WorkerContext {
            state: Arc::new(state),
            budget: Arc::new(Budget::new(config.crawler.limit)),
            progress: Arc::new(Progress::new(config.crawler.stall_threshold)),
            extractor: Arc::new(JsonLdExtractor),
            sink,
        };

        Ok(Self {
            cache: ArtifactCache::new(&config.output.data_dir),
            config: Arc::new(config),
            ctx,
            pool,
            strategy,
            driver: None,
        })
    }

    /// Replaces the site navigation used in partition mode
    pub fn with_strategy(mut self, strategy: Arc<dyn NavigationStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Replaces the record extractor
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.ctx.extractor = extractor;
        self
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.ctx.state
    }

    pub fn budget(&self) -> &Arc<Budget> {
        &self.ctx.budget
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Runs the configured crawl to completion
    ///
    /// Returns once every worker has reached a terminal state. Agents stay
    /// open; call [`shutdown`](Self::shutdown) afterwards.
    pub async fn run(&self) -> Result<RunSummary> {
        info!(
            "Starting {:?} crawl with {} workers (limit: {}, {} units already completed)",
            self.config.mode,
            self.config.crawler.workers,
            self.config.crawler.limit,
            self.ctx.state.completed_count()
        );

        match self.config.mode {
            CrawlMode::Link => self.run_links().await?,
            CrawlMode::Partition => self.run_partitions().await?,
        }

        self.ctx.state.save()?;
        let summary = self.ctx.progress.summary();
        summary.log();
        Ok(summary)
    }

    /// Closes every agent, saves state and stops the local driver
    pub async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.quit_all().await;
        }
        if let Err(e) = self.ctx.state.save() {
            error!("Failed to save crawl state on shutdown: {}", e);
        }
        if let Some(driver) = &self.driver {
            driver.shutdown().await;
        }
    }

    fn pool(&self) -> Result<&Arc<AgentPool>> {
        self.pool.as_ref().ok_or_else(|| {
            CrawlError::Config(ConfigError::Validation(
                "this run needs browser sessions but no agent factory was configured".to_string(),
            ))
        })
    }

    async fn run_links(&self) -> Result<()> {
        let scope_config = self.config.scope.as_ref().ok_or_else(|| {
            ConfigError::Validation("link mode requires a [scope] section".to_string())
        })?;
        let scope = ScopeFilter::from_config(scope_config)?;
        let seed = WorkUnit::parse(&scope_config.start_url)?;
        let frontier: Arc<dyn Frontier> = Arc::new(LinkFrontier::new(
            scope,
            seed,
            self.config.crawler.max_unit_attempts,
        ));

        let live: Arc<dyn LiveFetch> = match self.config.fetch.backend {
            FetchBackend::Http => Arc::new(HttpFetcher::new(&self.config.fetch)?),
            FetchBackend::Agent => Arc::new(AgentFetcher::new(
                Arc::clone(self.pool()?),
                &self.config.agent,
            )),
        };
        let resolver = Arc::new(Resolver::new(self.cache.clone(), live, true));

        let mut workers = JoinSet::new();
        for index in 0..self.config.crawler.workers as usize {
            let frontier = Arc::clone(&frontier);
            let resolver = Arc::clone(&resolver);
            let ctx = self.ctx.clone();
            let delay = self.config.crawler.stagger() * index as u32;
            let cooldown = self.config.crawler.cooldown();

            workers.spawn(async move {
                tokio::time::sleep(delay).await;
                let mut worker = LinkWorker::new(index, frontier, resolver, ctx, cooldown);
                worker.run().await
            });
        }

        join_workers(workers).await;
        Ok(())
    }

    async fn run_partitions(&self) -> Result<()> {
        let pool = Arc::clone(self.pool()?);
        let strategy = self.strategy.clone().ok_or_else(|| {
            ConfigError::Validation("partition mode requires a [site] section".to_string())
        })?;

        let partitions = self.partitions(&pool, strategy.as_ref()).await?;
        if partitions.is_empty() {
            warn!("No partitions to crawl");
            return Ok(());
        }
        info!("Crawling {} partitions", partitions.len());

        let frontier: Arc<dyn Frontier> = Arc::new(PartitionFrontier::new(partitions));
        let settings = SupervisorSettings::from_config(&self.config);

        let mut workers = JoinSet::new();
        for index in 0..self.config.crawler.workers as usize {
            let frontier = Arc::clone(&frontier);
            let pool = Arc::clone(&pool);
            let strategy = Arc::clone(&strategy);
            let ctx = self.ctx.clone();
            let cache = self.cache.clone();
            let settings = settings.clone();
            let delay = self.config.crawler.stagger() * index as u32;

            workers.spawn(async move {
                tokio::time::sleep(delay).await;

                let mut last = SupervisorState::Completed;
                while let Some(partition) = frontier.next().await {
                    if ctx.budget.is_reached() {
                        last = SupervisorState::Stopped;
                        break;
                    }

                    let mut supervisor = PartitionSupervisor::new(
                        partition,
                        ctx.clone(),
                        Arc::clone(&pool),
                        cache.clone(),
                        Arc::clone(&strategy),
                        settings.clone(),
                    );
                    last = supervisor.run().await;

                    if last == SupervisorState::Stopped {
                        frontier.close();
                        break;
                    }
                }
                last
            });
        }

        join_workers(workers).await;
        Ok(())
    }

    /// Configured partitions, or the ones the strategy finds on the start page
    ///
    /// Discovered partitions are recorded in the state tree and saved before
    /// any of them is crawled.
    async fn partitions(
        &self,
        pool: &AgentPool,
        strategy: &dyn NavigationStrategy,
    ) -> Result<Vec<WorkUnit>> {
        let site = self.config.site.as_ref().ok_or_else(|| {
            ConfigError::Validation("partition mode requires a [site] section".to_string())
        })?;

        if !site.partitions.is_empty() {
            return site
                .partitions
                .iter()
                .map(|entry| -> Result<WorkUnit> {
                    Ok(WorkUnit::parse(&entry.url)?.with_ancestors(entry.breadcrumb()))
                })
                .collect();
        }

        info!("No partitions configured, discovering from {}", site.start_url);
        let agent = pool.acquire().await?;
        let discovered = strategy.discover_partitions(&*agent).await;
        match &discovered {
            Err(e) if e.is_fatal() => pool.discard(agent).await,
            _ => pool.release(agent).await,
        }
        let discovered = discovered?;

        for unit in &discovered {
            debug!("Discovered partition {}", unit.label());
            self.ctx.state.record_path(unit.ancestors());
        }
        self.ctx.state.save()?;
        info!("Discovered {} partitions", discovered.len());

        Ok(discovered)
    }
}

async fn join_workers(mut workers: JoinSet<SupervisorState>) {
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(state) => debug!("Worker finished in state {:?}", state),
            Err(e) => error!("{}", CrawlError::Worker(e.to_string())),
        }
    }
}

/// Runs the main crawl operation
///
/// Builds a [`Coordinator`], runs it and shuts it down again, whatever the
/// outcome of the run.
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `fresh` - Delete the state file before starting
///
/// # Returns
///
/// * `Ok(RunSummary)` - Crawl finished
/// * `Err(CrawlError)` - Crawl failed with an error
///
/// # Example
///
/// ```no_run
/// use pricecrawl::config::load_config;
/// use pricecrawl::crawler::run_crawl;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("config.toml"))?;
/// run_crawl(config, false).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(config: Config, fresh: bool) -> Result<RunSummary> {
    let coordinator = Coordinator::new(config, fresh).await?;
    let result = coordinator.run().await;
    coordinator.shutdown().await;
    result
}

/// Human-readable plan for `--dry-run`
pub fn describe_plan(config: &Config) -> String {
    let mut lines = vec![
        format!("Mode: {:?}", config.mode),
        format!("Workers: {}", config.crawler.workers),
        format!(
            "Budget: {}",
            match config.crawler.limit {
                0 => "unlimited".to_string(),
                limit => limit.to_string(),
            }
        ),
        format!("Cooldown: {}ms, stagger: {}ms", config.crawler.cooldown_ms, config.crawler.stagger_ms),
        format!("Data directory: {}", config.output.data_dir),
        format!("State file: {}", config.state_path().display()),
    ];

    if let Some(records) = config.records_path() {
        lines.push(format!("Records file: {}", records.display()));
    }

    if config.uses_agents() {
        lines.push(format!(
            "Browser: {:?} ({}), up to {} sessions",
            config.agent.browser,
            config
                .agent
                .endpoint
                .as_deref()
                .unwrap_or("local driver"),
            match config.agent.max_agents {
                0 => "unbounded".to_string(),
                n => n.to_string(),
            }
        ));
    }

    match config.mode {
        CrawlMode::Link => {
            if let Some(scope) = &config.scope {
                lines.push(format!("Start URL: {}", scope.start_url));
                lines.push(format!("Fetch backend: {:?}", config.fetch.backend));
                for allow in &scope.allow {
                    lines.push(format!("  allow /{} (depth <= {})", allow.prefix, allow.max_depth));
                }
                for deny in &scope.deny_query_prefixes {
                    lines.push(format!("  deny query keys starting with '{}'", deny));
                }
            }
        }
        CrawlMode::Partition => {
            if let Some(site) = &config.site {
                lines.push(format!("Start URL: {}", site.start_url));
                if site.partitions.is_empty() {
                    lines.push("Partitions: discovered at runtime".to_string());
                } else {
                    lines.push(format!("Partitions ({}):", site.partitions.len()));
                    for entry in &site.partitions {
                        lines.push(format!("  - {} ({})", entry.breadcrumb().join(" > "), entry.url));
                    }
                }
            }
        }
    }

    lines.join("\n")
}

/// True if a state file already exists for this configuration
pub fn has_previous_state(config: &Config) -> bool {
    config.state_path().exists()
}
