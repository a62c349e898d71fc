use crate::agent::{Agent, AgentError, AgentFactory, AgentId, AgentResult};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// An agent checked out of the pool
///
/// Hand it back with [`AgentPool::release`] or [`AgentPool::discard`]. If it
/// is simply dropped, its capacity slot frees up and the session stays in
/// the active set until [`AgentPool::quit_all`].
pub struct PooledAgent {
    agent: Arc<dyn Agent>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Deref for PooledAgent {
    type Target = dyn Agent;

    fn deref(&self) -> &Self::Target {
        self.agent.as_ref()
    }
}

impl std::fmt::Debug for PooledAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledAgent")
            .field("id", &self.agent.id())
            .finish()
    }
}

/// Bounded pool of automation sessions
///
/// Capacity bounds live sessions (idle plus checked out). When the pool is
/// full and nothing is idle, [`acquire`](AgentPool::acquire) waits for a
/// release or discard.
pub struct AgentPool {
    factory: Arc<dyn AgentFactory>,
    idle: Mutex<VecDeque<Arc<dyn Agent>>>,
    active: Mutex<HashMap<AgentId, Arc<dyn Agent>>>,
    capacity: Option<Arc<Semaphore>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl AgentPool {
    /// Creates an empty pool
    ///
    /// # Arguments
    ///
    /// * `factory` - Session constructor
    /// * `max_agents` - Maximum live sessions, 0 for unbounded
    pub fn new(factory: Arc<dyn AgentFactory>, max_agents: usize) -> Self {
        Self {
            factory,
            idle: Mutex::new(VecDeque::new()),
            active: Mutex::new(HashMap::new()),
            capacity: (max_agents > 0).then(|| Arc::new(Semaphore::new(max_agents))),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Checks out an idle agent or starts a new one
    pub async fn acquire(&self) -> AgentResult<PooledAgent> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AgentError::PoolClosed);
        }

        let permit = match &self.capacity {
            Some(semaphore) => Some(
                Arc::clone(semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| AgentError::PoolClosed)?,
            ),
            None => None,
        };

        let reused = self.idle.lock().pop_front();
        let agent = match reused {
            Some(agent) => {
                debug!("Reusing agent {}", agent.id());
                agent
            }
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let agent = self.factory.create(id).await?;
                info!("Started agent {}", agent.id());
                agent
            }
        };

        {
            let mut active = self.active.lock();
            if !self.closed.load(Ordering::Acquire) {
                active.insert(agent.id(), Arc::clone(&agent));
                return Ok(PooledAgent {
                    agent,
                    _permit: permit,
                });
            }
        }

        // shutdown began while this agent was being prepared
        close_quietly(&agent).await;
        Err(AgentError::PoolClosed)
    }

    /// Returns an agent for reuse after resetting it
    ///
    /// The agent stays in the active set while it resets, so a concurrent
    /// [`quit_all`](AgentPool::quit_all) still finds and closes it. If the
    /// reset fails the agent is discarded instead.
    pub async fn release(&self, pooled: PooledAgent) {
        let id = pooled.agent.id();

        if self.closed.load(Ordering::Acquire) {
            self.close_if_active(&pooled.agent).await;
            return;
        }

        if let Err(e) = pooled.agent.reset().await {
            warn!("Agent {} failed to reset, discarding: {}", id, e);
            self.close_if_active(&pooled.agent).await;
            return;
        }

        let pooled_again = {
            let mut idle = self.idle.lock();
            let was_active = self.active.lock().remove(&id).is_some();
            if !was_active {
                // quit_all already took and closed it
                return;
            }
            if self.closed.load(Ordering::Acquire) {
                false
            } else {
                idle.push_back(Arc::clone(&pooled.agent));
                true
            }
        };

        if pooled_again {
            debug!("Agent {} returned to pool", id);
        } else {
            close_quietly(&pooled.agent).await;
        }
        // permit drops here, after the agent is idle again
    }

    /// Removes an agent from the pool and closes it, ignoring errors
    pub async fn discard(&self, pooled: PooledAgent) {
        warn!("Discarding agent {}", pooled.agent.id());
        self.close_if_active(&pooled.agent).await;
    }

    /// Closes an agent unless quit_all already owns it
    ///
    /// The agent leaves the active set only once the close has finished, so
    /// a caller cancelled mid-close leaves it for quit_all.
    async fn close_if_active(&self, agent: &Arc<dyn Agent>) {
        if !self.active.lock().contains_key(&agent.id()) {
            return;
        }
        close_quietly(agent).await;
        self.active.lock().remove(&agent.id());
    }

    /// Closes every idle and checked-out agent and refuses further checkouts
    ///
    /// Meant for process shutdown only.
    pub async fn quit_all(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(semaphore) = &self.capacity {
            semaphore.close();
        }

        let idle: Vec<_> = self.idle.lock().drain(..).collect();
        let active: Vec<_> = self.active.lock().drain().map(|(_, agent)| agent).collect();

        if !idle.is_empty() || !active.is_empty() {
            info!(
                "Shutting down {} idle and {} active agents",
                idle.len(),
                active.len()
            );
        }

        for agent in idle.iter().chain(active.iter()) {
            close_quietly(agent).await;
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

async fn close_quietly(agent: &Arc<dyn Agent>) {
    if let Err(e) = agent.close().await {
        debug!("Ignoring close error for agent {}: {}", agent.id(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        closed: AtomicUsize,
        resets: AtomicUsize,
    }

    struct FakeAgent {
        id: AgentId,
        counters: Arc<Counters>,
        fail_reset: bool,
        reset_delay: Duration,
    }

    #[async_trait]
    impl Agent for FakeAgent {
        fn id(&self) -> AgentId {
            self.id
        }
        async fn navigate(&self, _url: &str) -> AgentResult<()> {
            Ok(())
        }
        async fn current_url(&self) -> AgentResult<String> {
            Ok("about:blank".to_string())
        }
        async fn page_source(&self) -> AgentResult<String> {
            Ok(String::new())
        }
        async fn back(&self) -> AgentResult<()> {
            Ok(())
        }
        async fn execute(&self, _script: &str, _args: Vec<Value>) -> AgentResult<Value> {
            Ok(Value::Null)
        }
        async fn reset(&self) -> AgentResult<()> {
            self.counters.resets.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.reset_delay).await;
            if self.fail_reset {
                Err(AgentError::Response("reset failed".to_string()))
            } else {
                Ok(())
            }
        }
        async fn close(&self) -> AgentResult<()> {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            Err(AgentError::Response("close always complains".to_string()))
        }
    }

    struct FakeFactory {
        counters: Arc<Counters>,
        fail_reset: bool,
        fail_create: bool,
        reset_delay: Duration,
    }

    #[async_trait]
    impl AgentFactory for FakeFactory {
        async fn create(&self, id: AgentId) -> AgentResult<Arc<dyn Agent>> {
            if self.fail_create {
                return Err(AgentError::Start("no browser".to_string()));
            }
            self.counters.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeAgent {
                id,
                counters: Arc::clone(&self.counters),
                fail_reset: self.fail_reset,
                reset_delay: self.reset_delay,
            }))
        }
    }

    fn pool(max: usize, fail_reset: bool) -> (Arc<AgentPool>, Arc<Counters>) {
        slow_reset_pool(max, fail_reset, Duration::ZERO)
    }

    fn slow_reset_pool(
        max: usize,
        fail_reset: bool,
        reset_delay: Duration,
    ) -> (Arc<AgentPool>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let factory = Arc::new(FakeFactory {
            counters: Arc::clone(&counters),
            fail_reset,
            fail_create: false,
            reset_delay,
        });
        (Arc::new(AgentPool::new(factory, max)), counters)
    }

    #[tokio::test]
    async fn test_released_agent_is_reused() {
        let (pool, counters) = pool(2, false);

        let agent = pool.acquire().await.unwrap();
        let first_id = agent.id();
        assert_eq!(pool.active_count(), 1);
        pool.release(agent).await;
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.active_count(), 0);

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), first_id);
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert_eq!(counters.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_reset_discards() {
        let (pool, counters) = pool(2, true);

        let agent = pool.acquire().await.unwrap();
        pool.release(agent).await;

        assert_eq!(pool.idle_count(), 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);

        let _fresh = pool.acquire().await.unwrap();
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_discard_swallows_close_errors() {
        let (pool, counters) = pool(1, false);

        let agent = pool.acquire().await.unwrap();
        pool.discard(agent).await;

        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);

        // the capacity slot came back
        let _next = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_acquire_blocks_at_capacity() {
        let (pool, counters) = pool(1, false);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|a| a.id()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let held_id = held.id();
        pool.release(held).await;

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got, held_id);
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unbounded_pool_creates_on_demand() {
        let (pool, counters) = pool(0, false);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), c.id());
        assert_eq!(counters.created.load(Ordering::SeqCst), 3);
        assert_eq!(pool.active_count(), 3);
    }

    #[tokio::test]
    async fn test_quit_all_closes_idle_and_active() {
        let (pool, counters) = pool(3, false);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        pool.release(a).await;

        pool.quit_all().await;

        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);
        assert!(matches!(pool.acquire().await, Err(AgentError::PoolClosed)));

        // a late release neither pools nor closes twice
        pool.release(b).await;
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_quit_all_during_reset_closes_agent_once() {
        let (pool, counters) = slow_reset_pool(2, false, Duration::from_millis(100));
        let agent = pool.acquire().await.unwrap();

        let releasing = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.release(agent).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // the agent is mid-reset, still visible to shutdown
        assert_eq!(pool.active_count(), 1);
        pool.quit_all().await;
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);

        tokio::time::timeout(Duration::from_secs(1), releasing)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_aborted_release_leaves_agent_for_quit_all() {
        let (pool, counters) = slow_reset_pool(2, false, Duration::from_secs(10));
        let agent = pool.acquire().await.unwrap();

        let releasing = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.release(agent).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        releasing.abort();
        let _ = releasing.await;

        pool.quit_all().await;
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_quit_all_wakes_waiters() {
        let (pool, _counters) = pool(1, false);
        let _held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|a| a.id()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.quit_all().await;
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(AgentError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_create_failure_frees_capacity() {
        let counters = Arc::new(Counters::default());
        let factory = Arc::new(FakeFactory {
            counters,
            fail_reset: false,
            fail_create: true,
            reset_delay: Duration::ZERO,
        });
        let pool = AgentPool::new(factory, 1);

        assert!(matches!(pool.acquire().await, Err(AgentError::Start(_))));
        assert!(matches!(pool.acquire().await, Err(AgentError::Start(_))));
        assert_eq!(pool.active_count(), 0);
    }
}
