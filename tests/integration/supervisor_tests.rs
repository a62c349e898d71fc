//! Integration tests for partition crawls
//!
//! A scripted browser session stands in for WebDriver and a fixed site map
//! stands in for the catalog, so the coordinator, agent pool, supervisors
//! and state store run exactly as they do against a real shop.

use async_trait::async_trait;
use parking_lot::Mutex;
use pricecrawl::agent::{Agent, AgentError, AgentFactory, AgentId, AgentResult};
use pricecrawl::config::{parse_config, Config};
use pricecrawl::crawler::{Coordinator, NavigationStrategy, PageKind};
use pricecrawl::WorkUnit;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const FRUIT: &str = "https://shop.example.com/fruit";
const DAIRY: &str = "https://shop.example.com/dairy";

fn product(n: u32) -> String {
    format!("https://shop.example.com/p/{}", n)
}

fn product_html(n: u32) -> String {
    format!(
        r#"<html><script type="application/ld+json">{{"@type":"Product","name":"item {}","offers":{{"price":"{}.90"}}}}</script></html>"#,
        n, n
    )
}

/// Shared record of what every session was asked to do
#[derive(Default)]
struct Site {
    visits: Mutex<Vec<String>>,
    /// URLs whose next navigation times out
    broken: Mutex<HashSet<String>>,
    sessions: Mutex<u64>,
}

impl Site {
    fn visits_of(&self, url: &str) -> usize {
        self.visits.lock().iter().filter(|v| *v == url).count()
    }
}

struct SiteAgent {
    id: AgentId,
    site: Arc<Site>,
    current: Mutex<String>,
    history: Mutex<Vec<String>>,
}

#[async_trait]
impl Agent for SiteAgent {
    fn id(&self) -> AgentId {
        self.id
    }

    async fn navigate(&self, url: &str) -> AgentResult<()> {
        self.site.visits.lock().push(url.to_string());
        if self.site.broken.lock().remove(url) {
            return Err(AgentError::Timeout(Duration::from_millis(5)));
        }
        let previous = std::mem::replace(&mut *self.current.lock(), url.to_string());
        self.history.lock().push(previous);
        Ok(())
    }

    async fn current_url(&self) -> AgentResult<String> {
        Ok(self.current.lock().clone())
    }

    async fn page_source(&self) -> AgentResult<String> {
        let current = self.current.lock().clone();
        Ok(current
            .strip_prefix("https://shop.example.com/p/")
            .and_then(|n| n.parse::<u32>().ok())
            .map(product_html)
            .unwrap_or_default())
    }

    async fn back(&self) -> AgentResult<()> {
        if let Some(previous) = self.history.lock().pop() {
            *self.current.lock() = previous;
        }
        Ok(())
    }

    async fn execute(&self, _script: &str, _args: Vec<Value>) -> AgentResult<Value> {
        Ok(Value::Null)
    }

    async fn reset(&self) -> AgentResult<()> {
        *self.current.lock() = "about:blank".to_string();
        self.history.lock().clear();
        Ok(())
    }

    async fn close(&self) -> AgentResult<()> {
        Ok(())
    }
}

struct SiteFactory {
    site: Arc<Site>,
}

#[async_trait]
impl AgentFactory for SiteFactory {
    async fn create(&self, id: AgentId) -> AgentResult<Arc<dyn Agent>> {
        *self.site.sessions.lock() += 1;
        Ok(Arc::new(SiteAgent {
            id,
            site: Arc::clone(&self.site),
            current: Mutex::new("about:blank".to_string()),
            history: Mutex::new(Vec::new()),
        }))
    }
}

/// Single-page listings taken from a fixed category map
struct MapStrategy {
    listings: HashMap<String, Vec<String>>,
    discovered: Vec<WorkUnit>,
}

impl MapStrategy {
    fn new() -> Self {
        let mut listings = HashMap::new();
        listings.insert(FRUIT.to_string(), vec![product(1), product(2), product(3)]);
        listings.insert(DAIRY.to_string(), vec![product(4), product(5)]);

        Self {
            listings,
            discovered: vec![
                WorkUnit::new(FRUIT, vec!["Food".to_string(), "Fruit".to_string()]),
                WorkUnit::new(DAIRY, vec!["Food".to_string(), "Dairy".to_string()]),
            ],
        }
    }
}

#[async_trait]
impl NavigationStrategy for MapStrategy {
    async fn navigate_to(&self, agent: &dyn Agent, unit: &WorkUnit) -> AgentResult<bool> {
        agent.navigate(unit.key()).await?;
        Ok(true)
    }

    async fn is_ready(&self, _agent: &dyn Agent, _kind: PageKind) -> AgentResult<bool> {
        Ok(true)
    }

    async fn list_child_work_units(
        &self,
        agent: &dyn Agent,
        parent: &WorkUnit,
    ) -> AgentResult<Vec<WorkUnit>> {
        let current = agent.current_url().await?;
        Ok(self
            .listings
            .get(&current)
            .into_iter()
            .flatten()
            .map(|p| WorkUnit::new(p.clone(), parent.ancestors().to_vec()))
            .collect())
    }

    async fn discover_partitions(&self, _agent: &dyn Agent) -> AgentResult<Vec<WorkUnit>> {
        Ok(self.discovered.clone())
    }
}

fn create_test_config(data_dir: &Path, workers: u32, limit: u64, configured: bool) -> Config {
    let partitions = if configured {
        format!(
            r#"
[[site.partitions]]
name = "Fruit"
url = "{}"
labels = ["Food", "Fruit"]

[[site.partitions]]
name = "Dairy"
url = "{}"
labels = ["Food", "Dairy"]
"#,
            FRUIT, DAIRY
        )
    } else {
        "partition-selector = \"nav a\"\n".to_string()
    };

    parse_config(&format!(
        r#"
mode = "partition"

[crawler]
workers = {workers}
limit = {limit}
cooldown-ms = 0
stagger-ms = 0

[agent]
max-agents = 2
page-timeout-ms = 1000
poll-interval-ms = 1

[output]
data-dir = "{dir}"
records-file = "records.jsonl"

[site]
start-url = "https://shop.example.com/"
ready-selector = ".listing"
child-selector = "a.product"
{partitions}"#,
        workers = workers,
        limit = limit,
        dir = data_dir.display(),
        partitions = partitions
    ))
    .expect("test config must be valid")
}

fn coordinator(config: Config, site: &Arc<Site>) -> Coordinator {
    let factory = Arc::new(SiteFactory {
        site: Arc::clone(site),
    });
    Coordinator::with_factory(config, false, Some(factory))
        .unwrap()
        .with_strategy(Arc::new(MapStrategy::new()))
}

fn read_state(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_partition_crawl_completes_every_category() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(Site::default());
    let config = create_test_config(dir.path(), 2, 0, true);
    let state_path = config.state_path();
    let records_path = config.records_path().unwrap();

    let crawl = coordinator(config, &site);
    let summary = crawl.run().await.unwrap();
    crawl.shutdown().await;

    assert_eq!(summary.units, 5);
    assert_eq!(summary.records, 5);
    assert_eq!(summary.restarts, 0);
    assert!(*site.sessions.lock() <= 2);

    let state = read_state(&state_path);
    assert_eq!(state["processed_products"].as_array().unwrap().len(), 5);
    assert!(state["tree"]["Food"]["Fruit"].is_object());
    assert!(state["tree"]["Food"]["Dairy"].is_object());

    let records = std::fs::read_to_string(records_path).unwrap();
    assert_eq!(records.lines().count(), 5);
    for line in records.lines() {
        let entry: Value = serde_json::from_str(line).unwrap();
        assert_eq!(entry["record"]["@type"], "Product");
        assert_eq!(entry["category"][0], "Food");
    }
}

#[tokio::test]
async fn test_restart_does_not_refetch_completed_products() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(Site::default());
    site.broken.lock().insert(product(2));

    let crawl = coordinator(create_test_config(dir.path(), 1, 0, true), &site);
    let summary = crawl.run().await.unwrap();
    crawl.shutdown().await;

    assert_eq!(summary.units, 5);
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.restarts, 1);

    // the partition listing is reloaded, finished products are skipped
    assert_eq!(site.visits_of(FRUIT), 2);
    assert_eq!(site.visits_of(&product(1)), 1);
    assert_eq!(site.visits_of(&product(2)), 2);
    assert_eq!(site.visits_of(&product(3)), 1);
    assert!(crawl.state().is_completed(&product(2)));
}

#[tokio::test]
async fn test_interrupted_run_resumes_without_refetching() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(Site::default());

    let first = coordinator(create_test_config(dir.path(), 1, 2, true), &site);
    first.run().await.unwrap();
    first.shutdown().await;
    assert_eq!(first.state().completed_count(), 2);

    let second = coordinator(create_test_config(dir.path(), 1, 0, true), &site);
    let summary = second.run().await.unwrap();
    second.shutdown().await;

    assert_eq!(summary.units, 3);
    assert_eq!(summary.skipped, 2);
    assert_eq!(second.state().completed_count(), 5);
    for n in 1..=5 {
        assert_eq!(site.visits_of(&product(n)), 1, "product {} fetched once", n);
    }
}

#[tokio::test]
async fn test_discovered_partitions_are_recorded_and_crawled() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(Site::default());
    let config = create_test_config(dir.path(), 2, 0, false);
    let state_path = config.state_path();

    let crawl = coordinator(config, &site);
    let summary = crawl.run().await.unwrap();
    crawl.shutdown().await;

    assert_eq!(summary.units, 5);
    let state = read_state(&state_path);
    assert!(state["tree"]["Food"]["Fruit"].is_object());
    assert!(state["tree"]["Food"]["Dairy"].is_object());
}

#[tokio::test]
async fn test_cached_products_survive_fresh_start() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(Site::default());

    let first = coordinator(create_test_config(dir.path(), 1, 0, true), &site);
    first.run().await.unwrap();
    first.shutdown().await;

    let factory = Arc::new(SiteFactory {
        site: Arc::clone(&site),
    });
    let fresh = Coordinator::with_factory(create_test_config(dir.path(), 1, 0, true), true, Some(factory))
        .unwrap()
        .with_strategy(Arc::new(MapStrategy::new()));
    let summary = fresh.run().await.unwrap();
    fresh.shutdown().await;

    assert_eq!(summary.units, 5);
    // listings are reloaded, product pages come from the artifact cache
    assert_eq!(site.visits_of(FRUIT), 2);
    for n in 1..=5 {
        assert_eq!(site.visits_of(&product(n)), 1);
    }
}
