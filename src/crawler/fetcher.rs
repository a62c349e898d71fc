//! Live fetchers
//!
//! This module handles content retrieval on a full cache miss:
//! - Building the HTTP client with the configured user agent
//! - GET requests with bounded retries and exponential backoff
//! - Browser-rendered fetches through a pooled agent

use crate::agent::{Agent, AgentPool, AgentResult};
use crate::cache::{FetchOutcome, LiveFetch};
use crate::config::{AgentConfig, FetchConfig};
use crate::crawler::strategy::wait_for_script;
use crate::frontier::WorkUnit;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest single backoff pause
const MAX_BACKOFF: Duration = Duration::from_secs(60);

const DOCUMENT_COMPLETE_SCRIPT: &str = "return document.readyState === 'complete';";

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The fetch configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &FetchConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_millis(config.timeout_ms))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Statuses worth retrying
fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 500 | 502 | 503 | 504)
}

/// Plain HTTP fetcher
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | HTTP 2xx | Found |
/// | HTTP 500, 502, 503, 504 | Retry with backoff |
/// | Timeout / connection error | Retry with backoff |
/// | Any other status | Rejected, no retry |
/// | Retries exhausted | Transient |
pub struct HttpFetcher {
    client: Client,
    retries: u32,
    backoff_base: Duration,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(
            build_http_client(config)?,
            config.retries,
            Duration::from_millis(config.backoff_base_ms),
        ))
    }

    pub fn with_client(client: Client, retries: u32, backoff_base: Duration) -> Self {
        Self {
            client,
            retries,
            backoff_base,
        }
    }

    /// Pause before retry number `attempt` (0-based): base * 2^attempt
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

#[async_trait]
impl LiveFetch for HttpFetcher {
    async fn fetch(&self, unit: &WorkUnit) -> FetchOutcome {
        let mut last_error = String::new();

        for attempt in 0..=self.retries {
            if attempt > 0 {
                let pause = self.backoff(attempt - 1);
                debug!(
                    "Retrying {} in {:?} (attempt {}/{})",
                    unit.key(),
                    pause,
                    attempt,
                    self.retries
                );
                tokio::time::sleep(pause).await;
            }

            match self.client.get(unit.key()).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        match response.bytes().await {
                            Ok(body) => return FetchOutcome::Found(body.to_vec()),
                            Err(e) => {
                                last_error = format!("body read failed: {}", e);
                                continue;
                            }
                        }
                    }

                    if is_retryable_status(status) {
                        last_error = format!("HTTP {}", status.as_u16());
                        continue;
                    }

                    return FetchOutcome::Rejected(status.as_u16());
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                    last_error = e.to_string();
                }
                Err(e) => return FetchOutcome::Transient(e.to_string()),
            }
        }

        warn!(
            "Fetching {} failed after {} retries: {}",
            unit.key(),
            self.retries,
            last_error
        );
        FetchOutcome::Transient(last_error)
    }
}

/// Fetches through a browser session borrowed from the pool
///
/// The page counts as loaded once `document.readyState` is `complete`.
pub struct AgentFetcher {
    pool: Arc<AgentPool>,
    page_timeout: Duration,
    poll_interval: Duration,
}

impl AgentFetcher {
    pub fn new(pool: Arc<AgentPool>, config: &AgentConfig) -> Self {
        Self {
            pool,
            page_timeout: config.page_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    async fn capture(&self, agent: &dyn Agent, url: &str) -> AgentResult<Option<String>> {
        agent.navigate(url).await?;

        let ready = wait_for_script(
            agent,
            DOCUMENT_COMPLETE_SCRIPT,
            Vec::new(),
            self.page_timeout,
            self.poll_interval,
        )
        .await?;

        if !ready {
            return Ok(None);
        }

        agent.page_source().await.map(Some)
    }
}

#[async_trait]
impl LiveFetch for AgentFetcher {
    async fn fetch(&self, unit: &WorkUnit) -> FetchOutcome {
        let agent = match self.pool.acquire().await {
            Ok(agent) => agent,
            Err(e) => return FetchOutcome::Transient(e.to_string()),
        };

        match self.capture(&*agent, unit.key()).await {
            Ok(Some(html)) if !html.trim().is_empty() => {
                self.pool.release(agent).await;
                FetchOutcome::Found(html.into_bytes())
            }
            Ok(_) => {
                self.pool.release(agent).await;
                FetchOutcome::Transient(format!("page not ready after {:?}", self.page_timeout))
            }
            Err(e) => {
                if e.is_fatal() {
                    self.pool.discard(agent).await;
                } else {
                    self.pool.release(agent).await;
                }
                FetchOutcome::Transient(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, AgentFactory, AgentId};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// How a scripted browser session behaves on every page
    #[derive(Clone, Copy)]
    enum Session {
        Loads,
        NeverReady,
        Crashed,
        Slow,
    }

    struct ScriptedBrowser {
        id: AgentId,
        session: Session,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Agent for ScriptedBrowser {
        fn id(&self) -> AgentId {
            self.id
        }
        async fn navigate(&self, _url: &str) -> AgentResult<()> {
            match self.session {
                Session::Crashed => Err(AgentError::Protocol {
                    code: "invalid session id".to_string(),
                    message: "session deleted because of page crash".to_string(),
                }),
                Session::Slow => Err(AgentError::Timeout(Duration::from_millis(20))),
                Session::Loads | Session::NeverReady => Ok(()),
            }
        }
        async fn current_url(&self) -> AgentResult<String> {
            Ok("https://shop.example.com/p/1".to_string())
        }
        async fn page_source(&self) -> AgentResult<String> {
            Ok("<html>rendered</html>".to_string())
        }
        async fn back(&self) -> AgentResult<()> {
            Ok(())
        }
        async fn execute(&self, _script: &str, _args: Vec<Value>) -> AgentResult<Value> {
            Ok(Value::Bool(matches!(self.session, Session::Loads)))
        }
        async fn reset(&self) -> AgentResult<()> {
            Ok(())
        }
        async fn close(&self) -> AgentResult<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ScriptedFactory {
        session: Session,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AgentFactory for ScriptedFactory {
        async fn create(&self, id: AgentId) -> AgentResult<Arc<dyn Agent>> {
            Ok(Arc::new(ScriptedBrowser {
                id,
                session: self.session,
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn agent_fetcher(session: Session) -> (AgentFetcher, Arc<AgentPool>, Arc<AtomicUsize>) {
        let closed = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(ScriptedFactory {
            session,
            closed: Arc::clone(&closed),
        });
        let pool = Arc::new(AgentPool::new(factory, 1));
        let config = AgentConfig {
            page_timeout_ms: 20,
            poll_interval_ms: 1,
            ..Default::default()
        };
        (AgentFetcher::new(Arc::clone(&pool), &config), pool, closed)
    }

    fn product() -> WorkUnit {
        WorkUnit::parse("https://shop.example.com/p/1").unwrap()
    }

    #[tokio::test]
    async fn test_rendered_page_is_found_and_agent_reused() {
        let (fetcher, pool, closed) = agent_fetcher(Session::Loads);

        let outcome = fetcher.fetch(&product()).await;
        assert_eq!(outcome, FetchOutcome::Found(b"<html>rendered</html>".to_vec()));
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.active_count(), 0);

        // the single slot is free again
        assert!(matches!(fetcher.fetch(&product()).await, FetchOutcome::Found(_)));
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_page_never_ready_is_transient() {
        let (fetcher, pool, closed) = agent_fetcher(Session::NeverReady);

        let outcome = fetcher.fetch(&product()).await;
        assert!(matches!(outcome, FetchOutcome::Transient(_)));
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dead_session_is_discarded() {
        let (fetcher, pool, closed) = agent_fetcher(Session::Crashed);

        let outcome = fetcher.fetch(&product()).await;
        assert!(matches!(outcome, FetchOutcome::Transient(_)));
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_navigation_timeout_keeps_session() {
        let (fetcher, pool, closed) = agent_fetcher(Session::Slow);

        let outcome = fetcher.fetch(&product()).await;
        assert!(matches!(outcome, FetchOutcome::Transient(_)));
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }

    fn fetcher(retries: u32) -> HttpFetcher {
        HttpFetcher::with_client(
            build_http_client(&FetchConfig::default()).unwrap(),
            retries,
            Duration::from_millis(1),
        )
    }

    fn unit(server: &MockServer, p: &str) -> WorkUnit {
        WorkUnit::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&FetchConfig::default()).is_ok());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let f = HttpFetcher::with_client(Client::new(), 5, Duration::from_secs(1));
        assert_eq!(f.backoff(0), Duration::from_secs(1));
        assert_eq!(f.backoff(1), Duration::from_secs(2));
        assert_eq!(f.backoff(3), Duration::from_secs(8));
        assert_eq!(f.backoff(10), MAX_BACKOFF);
        assert_eq!(f.backoff(40), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slevy"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let outcome = fetcher(2).fetch(&unit(&server, "/slevy")).await;
        assert_eq!(outcome, FetchOutcome::Found(b"<html>ok</html>".to_vec()));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("finally"))
            .mount(&server)
            .await;

        let outcome = fetcher(3).fetch(&unit(&server, "/flaky")).await;
        assert_eq!(outcome, FetchOutcome::Found(b"finally".to_vec()));
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = fetcher(2).fetch(&unit(&server, "/down")).await;
        assert!(matches!(outcome, FetchOutcome::Transient(_)));
    }

    #[tokio::test]
    async fn test_not_found_is_rejected_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = fetcher(5).fetch(&unit(&server, "/missing")).await;
        assert_eq!(outcome, FetchOutcome::Rejected(404));
    }
}
