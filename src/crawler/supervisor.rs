//! Worker supervision
//!
//! Both worker kinds move through the same states:
//!
//! ```text
//! Starting -> Running -> Completed
//!                     -> Stopped            (budget exhausted or shutdown)
//!                     -> Failed -> Cooldown -> Starting
//! ```
//!
//! A partition restart begins again at page one. Units finished on an
//! earlier attempt are skipped through the state store, and pages captured
//! earlier come back from the artifact cache, so the repeat costs lookups
//! rather than navigation.

use crate::agent::{Agent, AgentError, AgentPool, PooledAgent};
use crate::cache::{ArtifactCache, Resolution, Resolver};
use crate::config::Config;
use crate::crawler::progress::Progress;
use crate::crawler::strategy::{wait_until_ready, Extractor, NavigationStrategy, PageKind, Record};
use crate::frontier::{Frontier, WorkUnit};
use crate::output::RecordSink;
use crate::state::{Budget, StateStore};
use crate::{CrawlError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Link mode saves state after this many newly processed units per worker
const LINK_SAVE_EVERY: usize = 10;

/// Lifecycle of one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Running,
    Completed,
    Failed,
    Cooldown,
    Stopped,
}

/// How one attempt ended
#[derive(Debug)]
pub enum AttemptOutcome {
    /// All work was processed
    Completed,
    /// The budget ran out or the run is shutting down
    Stopped,
    /// The attempt must be abandoned and restarted
    Failed(CrawlError),
}

/// Run-wide collaborators every worker needs
#[derive(Clone)]
pub struct WorkerContext {
    pub state: Arc<StateStore>,
    pub budget: Arc<Budget>,
    pub progress: Arc<Progress>,
    pub extractor: Arc<dyn Extractor>,
    pub sink: Option<Arc<RecordSink>>,
}

impl WorkerContext {
    /// Runs the extractor; failures count as zero records
    fn extract(&self, unit: &WorkUnit, content: &[u8]) -> Vec<Record> {
        match self.extractor.extract(content) {
            Ok(records) => records,
            Err(e) => {
                warn!("Extraction failed for {}: {}", unit.key(), e);
                Vec::new()
            }
        }
    }

    /// Spends one budget item on `unit` and records it
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The unit was recorded and marked complete
    /// * `Ok(false)` - The budget is exhausted; nothing was recorded
    fn commit(&self, unit: &WorkUnit, records: &[Record]) -> Result<bool> {
        if !self.budget.try_increment() {
            return Ok(false);
        }

        if let Some(sink) = &self.sink {
            sink.write(unit, records)?;
        }
        self.state.mark_unit(unit.key(), unit.ancestors());
        self.progress.record_unit(records.len());
        Ok(true)
    }

    fn persist(&self, prefix: &str) {
        if let Err(e) = self.state.save() {
            error!("{} failed to save crawl state: {}", prefix, e);
        }
    }
}

/// Timing and restart policy
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub cooldown: Duration,
    /// Restarts allowed per partition, 0 for unlimited
    pub max_restarts: u32,
    pub page_timeout: Duration,
    pub poll_interval: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cooldown: config.crawler.cooldown(),
            max_restarts: config.crawler.max_restarts,
            page_timeout: config.agent.page_timeout(),
            poll_interval: config.agent.poll_interval(),
        }
    }
}

/// Owns the full traversal of one partition, restarting it on failure
pub struct PartitionSupervisor {
    partition: WorkUnit,
    prefix: String,
    ctx: WorkerContext,
    pool: Arc<AgentPool>,
    cache: ArtifactCache,
    strategy: Arc<dyn NavigationStrategy>,
    settings: SupervisorSettings,
    state: SupervisorState,
    history: Vec<SupervisorState>,
}

impl PartitionSupervisor {
    pub fn new(
        partition: WorkUnit,
        ctx: WorkerContext,
        pool: Arc<AgentPool>,
        cache: ArtifactCache,
        strategy: Arc<dyn NavigationStrategy>,
        settings: SupervisorSettings,
    ) -> Self {
        let prefix = format!("[{}]", partition.label());
        Self {
            partition,
            prefix,
            ctx,
            pool,
            cache,
            strategy,
            settings,
            state: SupervisorState::Starting,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Every state entered so far, in order
    pub fn history(&self) -> &[SupervisorState] {
        &self.history
    }

    /// Drives the partition to a terminal state
    ///
    /// # Returns
    ///
    /// `Completed`, `Stopped`, or `Failed` once the restart limit is spent
    pub async fn run(&mut self) -> SupervisorState {
        let mut restarts = 0u32;

        loop {
            self.transition(SupervisorState::Starting);

            let outcome = match self.pool.acquire().await {
                Ok(agent) => {
                    self.transition(SupervisorState::Running);
                    let outcome = self.attempt(&*agent).await;
                    self.hand_back(agent, &outcome).await;
                    outcome
                }
                Err(AgentError::PoolClosed) => AttemptOutcome::Stopped,
                Err(e) => AttemptOutcome::Failed(e.into()),
            };

            let error = match outcome {
                AttemptOutcome::Completed => return self.finish(SupervisorState::Completed),
                AttemptOutcome::Stopped => return self.finish(SupervisorState::Stopped),
                AttemptOutcome::Failed(error) => error,
            };

            self.transition(SupervisorState::Failed);
            self.ctx.progress.record_failure();
            self.ctx.persist(&self.prefix);
            warn!("{} attempt failed: {}", self.prefix, error);

            restarts += 1;
            if self.settings.max_restarts > 0 && restarts > self.settings.max_restarts {
                error!(
                    "{} giving up after {} restarts",
                    self.prefix, self.settings.max_restarts
                );
                return SupervisorState::Failed;
            }
            self.ctx.progress.record_restart(self.ctx.budget.count());

            self.transition(SupervisorState::Cooldown);
            tokio::time::sleep(self.settings.cooldown).await;

            if self.ctx.budget.is_reached() || self.pool.is_closed() {
                return self.finish(SupervisorState::Stopped);
            }
            info!("{} restarting from the first page (restart {})", self.prefix, restarts);
        }
    }

    fn transition(&mut self, next: SupervisorState) {
        debug!("{} {:?} -> {:?}", self.prefix, self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn finish(&mut self, terminal: SupervisorState) -> SupervisorState {
        self.transition(terminal);
        self.ctx.persist(&self.prefix);
        info!("{} {:?}", self.prefix, terminal);
        terminal
    }

    async fn hand_back(&self, agent: PooledAgent, outcome: &AttemptOutcome) {
        match outcome {
            AttemptOutcome::Failed(e) if e.is_agent_fatal() => self.pool.discard(agent).await,
            _ => self.pool.release(agent).await,
        }
    }

    async fn attempt(&self, agent: &dyn Agent) -> AttemptOutcome {
        match self.traverse(agent).await {
            Ok(outcome) => outcome,
            Err(e) => AttemptOutcome::Failed(e),
        }
    }

    /// Walks every listing page of the partition in order
    async fn traverse(&self, agent: &dyn Agent) -> Result<AttemptOutcome> {
        if self.ctx.budget.is_reached() {
            return Ok(AttemptOutcome::Stopped);
        }

        if !self.strategy.navigate_to(agent, &self.partition).await? {
            return Err(CrawlError::NavigationFailed {
                unit: self.partition.key().to_string(),
            });
        }
        self.wait_ready(agent, PageKind::Listing, &self.partition)
            .await?;

        let mut page = 1u32;
        loop {
            let children = self
                .strategy
                .list_child_work_units(agent, &self.partition)
                .await?;

            if children.is_empty() {
                if page == 1 {
                    return Err(CrawlError::EmptyContent {
                        unit: self.partition.key().to_string(),
                    });
                }
                debug!("{} page {} lists nothing", self.prefix, page);
                break;
            }
            info!("{} page {}: {} products", self.prefix, page, children.len());

            for child in &children {
                if self.ctx.state.is_completed(child.key()) {
                    self.ctx.progress.record_skip();
                    continue;
                }
                if self.ctx.budget.is_reached() {
                    return Ok(AttemptOutcome::Stopped);
                }

                let content = self.obtain(agent, child).await?;
                let records = self.ctx.extract(child, &content);
                if !self.ctx.commit(child, &records)? {
                    info!("{} budget exhausted", self.prefix);
                    return Ok(AttemptOutcome::Stopped);
                }
            }

            self.ctx.state.save()?;

            if self.ctx.budget.is_reached() {
                return Ok(AttemptOutcome::Stopped);
            }
            if !self.strategy.advance_page(agent).await? {
                break;
            }
            self.wait_ready(agent, PageKind::Listing, &self.partition)
                .await?;
            page += 1;
        }

        info!("{} finished after {} pages", self.prefix, page);
        Ok(AttemptOutcome::Completed)
    }

    /// Returns a child's page from the cache, capturing it on a miss
    ///
    /// A capture leaves the agent back on the listing it started from.
    async fn obtain(&self, agent: &dyn Agent, child: &WorkUnit) -> Result<Vec<u8>> {
        if let Some(content) = self.cache.read_content(child)? {
            debug!("{} cache hit for {}", self.prefix, child.key());
            return Ok(content);
        }

        if !self.strategy.navigate_to(agent, child).await? {
            return Err(CrawlError::NavigationFailed {
                unit: child.key().to_string(),
            });
        }
        self.wait_ready(agent, PageKind::Detail, child).await?;

        let html = agent.page_source().await?;
        if html.trim().is_empty() {
            return Err(CrawlError::EmptyContent {
                unit: child.key().to_string(),
            });
        }
        self.cache.write_content(child, html.as_bytes())?;

        agent.back().await?;
        self.wait_ready(agent, PageKind::Listing, &self.partition)
            .await?;

        Ok(html.into_bytes())
    }

    async fn wait_ready(&self, agent: &dyn Agent, kind: PageKind, unit: &WorkUnit) -> Result<()> {
        let ready = wait_until_ready(
            self.strategy.as_ref(),
            agent,
            kind,
            self.settings.page_timeout,
            self.settings.poll_interval,
        )
        .await?;

        if ready {
            Ok(())
        } else {
            Err(CrawlError::ReadyTimeout {
                unit: unit.key().to_string(),
                waited: self.settings.page_timeout,
            })
        }
    }
}

/// Drains a shared link frontier
///
/// A failed unit goes back to the frontier (up to its attempt limit) and the
/// worker cools down before taking more work.
pub struct LinkWorker {
    prefix: String,
    frontier: Arc<dyn Frontier>,
    resolver: Arc<Resolver>,
    ctx: WorkerContext,
    cooldown: Duration,
    state: SupervisorState,
    history: Vec<SupervisorState>,
    unsaved: usize,
}

impl LinkWorker {
    pub fn new(
        index: usize,
        frontier: Arc<dyn Frontier>,
        resolver: Arc<Resolver>,
        ctx: WorkerContext,
        cooldown: Duration,
    ) -> Self {
        Self {
            prefix: format!("[worker {}]", index),
            frontier,
            resolver,
            ctx,
            cooldown,
            state: SupervisorState::Starting,
            history: Vec::new(),
            unsaved: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn history(&self) -> &[SupervisorState] {
        &self.history
    }

    /// Takes units until the frontier is exhausted or the budget runs out
    pub async fn run(&mut self) -> SupervisorState {
        self.transition(SupervisorState::Starting);
        self.transition(SupervisorState::Running);

        let terminal = loop {
            if self.ctx.budget.is_reached() {
                break SupervisorState::Stopped;
            }

            let Some(unit) = self.frontier.next().await else {
                break SupervisorState::Completed;
            };

            match self.process(&unit).await {
                Ok(true) => self.frontier.finish(&unit),
                Ok(false) => {
                    self.frontier.finish(&unit);
                    break SupervisorState::Stopped;
                }
                Err(e) => {
                    self.transition(SupervisorState::Failed);
                    self.ctx.progress.record_failure();
                    warn!("{} {} failed: {}", self.prefix, unit.key(), e);

                    let key = unit.key().to_string();
                    if self.frontier.retry(unit) {
                        debug!("{} requeued {}", self.prefix, key);
                    } else {
                        warn!("{} dropping {} after repeated failures", self.prefix, key);
                    }
                    self.ctx.progress.record_restart(self.ctx.budget.count());

                    self.transition(SupervisorState::Cooldown);
                    tokio::time::sleep(self.cooldown).await;
                    self.transition(SupervisorState::Starting);
                    self.transition(SupervisorState::Running);
                }
            }
        };

        if terminal == SupervisorState::Stopped {
            info!("{} budget exhausted", self.prefix);
            self.frontier.close();
        }
        self.transition(terminal);
        self.ctx.persist(&self.prefix);
        terminal
    }

    fn transition(&mut self, next: SupervisorState) {
        debug!("{} {:?} -> {:?}", self.prefix, self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Handles one unit
    ///
    /// Completed units are only expanded from cached links; they are never
    /// fetched, extracted or counted again.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Done with the unit
    /// * `Ok(false)` - Budget exhausted before the unit could be recorded
    /// * `Err(CrawlError)` - The attempt failed
    async fn process(&mut self, unit: &WorkUnit) -> Result<bool> {
        if self.ctx.state.is_completed(unit.key()) {
            self.ctx.progress.record_skip();
            if let Some(resolution) = self.resolver.resolve_cached(unit)? {
                self.submit_links(resolution.links());
            }
            return Ok(true);
        }

        let resolution = self.resolver.resolve(unit).await?;

        let records = match &resolution {
            Resolution::Empty { reason } => {
                debug!("{} no content for {}: {}", self.prefix, unit.key(), reason);
                return Err(CrawlError::EmptyContent {
                    unit: unit.key().to_string(),
                });
            }
            Resolution::Links(_) => match self.resolver.cache().read_content(unit)? {
                Some(content) => self.ctx.extract(unit, &content),
                None => Vec::new(),
            },
            Resolution::Content { content, .. } => self.ctx.extract(unit, content),
        };

        if !self.ctx.commit(unit, &records)? {
            return Ok(false);
        }
        self.submit_links(resolution.links());

        self.unsaved += 1;
        if self.unsaved >= LINK_SAVE_EVERY {
            self.ctx.state.save()?;
            self.unsaved = 0;
        }

        Ok(true)
    }

    fn submit_links(&self, links: &[String]) {
        let children = links
            .iter()
            .filter_map(|link| WorkUnit::parse(link).ok())
            .collect();
        self.frontier.submit(children);
    }
}
