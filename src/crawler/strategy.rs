//! Site navigation and record extraction seams
//!
//! The engine drives any site through [`NavigationStrategy`] and turns
//! captured pages into records through [`Extractor`]. [`SelectorStrategy`]
//! covers catalog sites whose listings can be described with CSS selectors;
//! [`JsonLdExtractor`] reads schema.org product data.

use crate::agent::{Agent, AgentError, AgentResult};
use crate::config::SiteConfig;
use crate::crawler::parser::select_anchors;
use crate::frontier::WorkUnit;
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Which kind of page a readiness check is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Category listing with child links
    Listing,
    /// Single product page
    Detail,
}

/// Site-specific navigation
#[async_trait]
pub trait NavigationStrategy: Send + Sync {
    /// Loads the page for `unit`; false means the site did not serve it
    async fn navigate_to(&self, agent: &dyn Agent, unit: &WorkUnit) -> AgentResult<bool>;

    /// One readiness poll for the current page
    async fn is_ready(&self, agent: &dyn Agent, kind: PageKind) -> AgentResult<bool>;

    /// Child units (products) listed on the current page
    async fn list_child_work_units(
        &self,
        agent: &dyn Agent,
        parent: &WorkUnit,
    ) -> AgentResult<Vec<WorkUnit>>;

    /// Moves the current listing to its next page; false when there is none
    async fn advance_page(&self, _agent: &dyn Agent) -> AgentResult<bool> {
        Ok(false)
    }

    /// Finds the partitions to crawl when none are configured
    async fn discover_partitions(&self, _agent: &dyn Agent) -> AgentResult<Vec<WorkUnit>> {
        Ok(Vec::new())
    }
}

/// Polls `check` until it yields true or `timeout` passes
///
/// # Returns
///
/// * `Ok(true)` - The condition held before the deadline
/// * `Ok(false)` - The deadline passed
/// * `Err(AgentError)` - A check failed
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> AgentResult<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AgentResult<bool>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if check().await? {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(interval).await;
    }
}

/// Polls a script until it returns `true`
pub async fn wait_for_script(
    agent: &dyn Agent,
    script: &str,
    args: Vec<Value>,
    timeout: Duration,
    interval: Duration,
) -> AgentResult<bool> {
    poll_until(timeout, interval, || {
        let args = args.clone();
        async move { Ok(agent.execute(script, args).await? == Value::Bool(true)) }
    })
    .await
}

/// Polls a strategy's readiness check
pub async fn wait_until_ready(
    strategy: &dyn NavigationStrategy,
    agent: &dyn Agent,
    kind: PageKind,
    timeout: Duration,
    interval: Duration,
) -> AgentResult<bool> {
    poll_until(timeout, interval, || strategy.is_ready(agent, kind)).await
}

const SELECTOR_PRESENT_SCRIPT: &str = "return document.querySelector(arguments[0]) !== null;";

const DOCUMENT_COMPLETE_SCRIPT: &str = "return document.readyState === 'complete';";

const CLICK_NEXT_SCRIPT: &str = r#"
    const el = document.querySelector(arguments[0]);
    if (!el || el.disabled || el.getAttribute('aria-disabled') === 'true') {
        return false;
    }
    el.scrollIntoView({block: 'center'});
    el.click();
    return true;
"#;

/// Navigation described entirely by CSS selectors from the `[site]` section
pub struct SelectorStrategy {
    site: SiteConfig,
    page_timeout: Duration,
    poll_interval: Duration,
}

impl SelectorStrategy {
    pub fn new(site: SiteConfig, page_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            site,
            page_timeout,
            poll_interval,
        }
    }

    async fn selector_present(&self, agent: &dyn Agent, selector: &str) -> AgentResult<bool> {
        let value = agent
            .execute(SELECTOR_PRESENT_SCRIPT, vec![Value::String(selector.to_string())])
            .await?;
        Ok(value == Value::Bool(true))
    }

    async fn current_base(&self, agent: &dyn Agent) -> AgentResult<Url> {
        let current = agent.current_url().await?;
        Url::parse(&current)
            .map_err(|e| AgentError::Response(format!("current url '{}' unparseable: {}", current, e)))
    }
}

#[async_trait]
impl NavigationStrategy for SelectorStrategy {
    async fn navigate_to(&self, agent: &dyn Agent, unit: &WorkUnit) -> AgentResult<bool> {
        agent.navigate(unit.key()).await?;

        // A redirect to another host (consent wall, bot check) is not the page we asked for
        let wanted = Url::parse(unit.key()).ok();
        let landed = self.current_base(agent).await?;
        let same_host = wanted
            .as_ref()
            .map_or(true, |w| w.host_str() == landed.host_str());

        if !same_host {
            debug!("{} redirected to {}", unit.key(), landed);
        }
        Ok(same_host)
    }

    async fn is_ready(&self, agent: &dyn Agent, kind: PageKind) -> AgentResult<bool> {
        match kind {
            PageKind::Listing => self.selector_present(agent, &self.site.ready_selector).await,
            PageKind::Detail => match &self.site.detail_ready_selector {
                Some(selector) => self.selector_present(agent, selector).await,
                None => Ok(agent.execute(DOCUMENT_COMPLETE_SCRIPT, Vec::new()).await?
                    == Value::Bool(true)),
            },
        }
    }

    async fn list_child_work_units(
        &self,
        agent: &dyn Agent,
        parent: &WorkUnit,
    ) -> AgentResult<Vec<WorkUnit>> {
        let html = agent.page_source().await?;
        let base = self.current_base(agent).await?;

        let children = select_anchors(&html, &self.site.child_selector, &base)
            .into_iter()
            .filter_map(|anchor| WorkUnit::parse(&anchor.url).ok())
            .map(|child| child.with_ancestors(parent.ancestors().to_vec()))
            .collect();

        Ok(children)
    }

    async fn advance_page(&self, agent: &dyn Agent) -> AgentResult<bool> {
        let Some(selector) = &self.site.next_page_selector else {
            return Ok(false);
        };

        let before = agent.current_url().await?;
        let clicked = agent
            .execute(CLICK_NEXT_SCRIPT, vec![Value::String(selector.clone())])
            .await?;
        if clicked != Value::Bool(true) {
            return Ok(false);
        }

        let moved = poll_until(self.page_timeout, self.poll_interval, || {
            let before = before.as_str();
            async move { Ok(agent.current_url().await? != before) }
        })
        .await?;

        if moved {
            Ok(true)
        } else {
            Err(AgentError::Timeout(self.page_timeout))
        }
    }

    async fn discover_partitions(&self, agent: &dyn Agent) -> AgentResult<Vec<WorkUnit>> {
        let Some(selector) = &self.site.partition_selector else {
            return Ok(Vec::new());
        };

        agent.navigate(&self.site.start_url).await?;
        let ready = poll_until(self.page_timeout, self.poll_interval, || {
            self.selector_present(agent, selector)
        })
        .await?;
        if !ready {
            return Err(AgentError::Timeout(self.page_timeout));
        }

        let html = agent.page_source().await?;
        let base = self.current_base(agent).await?;

        Ok(select_anchors(&html, selector, &base)
            .into_iter()
            .filter(|anchor| !anchor.text.is_empty())
            .filter_map(|anchor| {
                WorkUnit::parse(&anchor.url)
                    .ok()
                    .map(|unit| unit.with_ancestors(vec![anchor.text]))
            })
            .collect())
    }
}

/// One extracted record
pub type Record = Value;

/// Errors raised by extractors
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Content is not valid UTF-8")]
    Encoding,

    #[error("Malformed structured data: {0}")]
    Malformed(String),
}

/// Turns captured content into records
///
/// Must be pure; the engine treats an error as zero records.
pub trait Extractor: Send + Sync {
    fn extract(&self, content: &[u8]) -> Result<Vec<Record>, ExtractError>;
}

/// Reads schema.org `Product` objects from JSON-LD script blocks
#[derive(Debug, Default, Clone)]
pub struct JsonLdExtractor;

impl Extractor for JsonLdExtractor {
    fn extract(&self, content: &[u8]) -> Result<Vec<Record>, ExtractError> {
        let html = std::str::from_utf8(content).map_err(|_| ExtractError::Encoding)?;
        let document = Html::parse_document(html);
        let selector = Selector::parse(r#"script[type="application/ld+json"]"#)
            .map_err(|e| ExtractError::Malformed(e.to_string()))?;

        let mut records = Vec::new();
        for script in document.select(&selector) {
            let text = script.text().collect::<String>();
            if text.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(text.trim())
                .map_err(|e| ExtractError::Malformed(e.to_string()))?;
            collect_products(value, &mut records);
        }

        Ok(records)
    }
}

fn collect_products(value: Value, out: &mut Vec<Record>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_products(item, out);
            }
        }
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                collect_products(graph, out);
            }
            let is_product = match map.get("@type") {
                Some(Value::String(t)) => t == "Product",
                Some(Value::Array(types)) => types.iter().any(|t| t == "Product"),
                _ => false,
            };
            if is_product {
                out.push(Value::Object(map));
            }
        }
        _ => {}
    }
}
