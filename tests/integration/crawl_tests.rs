//! Integration tests for link-following crawls
//!
//! These tests use wiremock to serve a small catalog and run the full
//! coordinator against it: scope filtering, retries, budget, the artifact
//! cache and resume from a previous run's state.

use pricecrawl::config::{parse_config, Config};
use pricecrawl::crawler::Coordinator;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a link-mode configuration rooted at `<server>/slevy`
fn create_test_config(base_url: &str, data_dir: &Path, limit: u64) -> Config {
    parse_config(&format!(
        r#"
mode = "link"

[crawler]
workers = 2
limit = {limit}
cooldown-ms = 0
stagger-ms = 0
max-unit-attempts = 2

[fetch]
retries = 1
backoff-base-ms = 1
timeout-ms = 2000

[output]
data-dir = "{dir}"
records-file = "records.jsonl"

[scope]
start-url = "{base}/slevy"
deny-query-prefixes = ["br"]

[[scope.allow]]
prefix = "slevy"
max-depth = 1
"#,
        limit = limit,
        dir = data_dir.display(),
        base = base_url
    ))
    .expect("test config must be valid")
}

fn product_page(name: &str) -> String {
    format!(
        r#"<html><head><script type="application/ld+json">
        {{"@context": "https://schema.org", "@type": "Product", "name": "{}",
          "offers": {{"@type": "Offer", "price": "29.90", "priceCurrency": "CZK"}}}}
        </script></head><body><a href="/slevy">Zpět</a></body></html>"#,
        name
    )
}

/// Mounts the catalog; returns nothing, expectations are checked on drop
async fn mount_catalog(server: &MockServer, expected_fetches: u64) {
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/slevy"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><body>
            <a href="/slevy/maso">Maso</a>
            <a href="{base}/slevy/syry#top">Sýry</a>
            <a href="/slevy/ovoce?brand=bio">Bio ovoce</a>
            <a href="/slevy/maso/hovezi">Hovězí</a>
            <a href="/letaky">Letáky</a>
            <a href="https://elsewhere.example.com/slevy/maso">Jinde</a>
            </body></html>"#,
            base = base
        )))
        .expect(expected_fetches)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/slevy/maso"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_page("Kuřecí prsa")))
        .expect(expected_fetches)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/slevy/syry"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_page("Eidam 30%")))
        .expect(expected_fetches)
        .mount(server)
        .await;

    // Out of scope: too deep, denied query, outside the allow-list
    for p in ["/slevy/maso/hovezi", "/slevy/ovoce", "/letaky"] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .expect(0)
            .mount(server)
            .await;
    }
}

fn read_state(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).expect("state file written"))
        .expect("state file is JSON")
}

fn completed_keys(state: &Value) -> Vec<String> {
    let mut keys: Vec<String> = state["completed"]
        .as_array()
        .expect("completed array")
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    keys.sort();
    keys
}

#[tokio::test]
async fn test_link_crawl_respects_scope() {
    let server = MockServer::start().await;
    mount_catalog(&server, 1).await;
    let base = server.uri();

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&base, dir.path(), 0);
    let state_path = config.state_path();
    let records_path = config.records_path().unwrap();

    let coordinator = Coordinator::with_factory(config, false, None).unwrap();
    let summary = coordinator.run().await.unwrap();
    coordinator.shutdown().await;

    assert_eq!(summary.units, 3);
    assert_eq!(summary.records, 2);

    let state = read_state(&state_path);
    assert_eq!(
        completed_keys(&state),
        vec![
            format!("{}/slevy", base),
            format!("{}/slevy/maso", base),
            format!("{}/slevy/syry", base),
        ]
    );
    assert!(state["tree"]["slevy"].is_object());

    let records = std::fs::read_to_string(records_path).unwrap();
    assert_eq!(records.lines().count(), 2);
    assert!(records.contains("Kuřecí prsa"));
    assert!(records.contains("Eidam 30%"));
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let server = MockServer::start().await;
    // each page is fetched once across both runs
    mount_catalog(&server, 1).await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    let first = Coordinator::with_factory(create_test_config(&base, dir.path(), 0), false, None)
        .unwrap();
    first.run().await.unwrap();
    first.shutdown().await;

    let second = Coordinator::with_factory(create_test_config(&base, dir.path(), 0), false, None)
        .unwrap();
    let summary = second.run().await.unwrap();
    second.shutdown().await;

    assert_eq!(summary.units, 0);
    assert_eq!(summary.skipped, 3);
    assert_eq!(second.budget().count(), 0);
    assert_eq!(second.state().completed_count(), 3);
}

#[tokio::test]
async fn test_fresh_run_reuses_cached_pages() {
    let server = MockServer::start().await;
    mount_catalog(&server, 1).await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    let first = Coordinator::with_factory(create_test_config(&base, dir.path(), 0), false, None)
        .unwrap();
    first.run().await.unwrap();
    first.shutdown().await;

    // state is gone, artifacts are not: everything is reprocessed without the network
    let fresh = Coordinator::with_factory(create_test_config(&base, dir.path(), 0), true, None)
        .unwrap();
    let summary = fresh.run().await.unwrap();
    fresh.shutdown().await;

    assert_eq!(summary.units, 3);
    assert_eq!(fresh.state().completed_count(), 3);
}

#[tokio::test]
async fn test_budget_limits_processed_units() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/slevy"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<a href="/slevy/maso">Maso</a><a href="/slevy/syry">Sýry</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_page("x")))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&base, dir.path(), 2);
    let state_path = config.state_path();

    let coordinator = Coordinator::with_factory(config, false, None).unwrap();
    let summary = coordinator.run().await.unwrap();
    coordinator.shutdown().await;

    assert_eq!(summary.units, 2);
    assert_eq!(coordinator.budget().count(), 2);
    assert_eq!(completed_keys(&read_state(&state_path)).len(), 2);
}

#[tokio::test]
async fn test_unavailable_page_is_retried_then_dropped() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/slevy"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"<a href="/slevy/down">Down</a>"#),
        )
        .mount(&server)
        .await;
    // two attempts of the unit, each with one HTTP retry
    Mock::given(method("GET"))
        .and(path("/slevy/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let coordinator =
        Coordinator::with_factory(create_test_config(&base, dir.path(), 0), false, None).unwrap();
    let summary = coordinator.run().await.unwrap();
    coordinator.shutdown().await;

    assert_eq!(summary.units, 1);
    assert_eq!(summary.failures, 2);
    assert!(!coordinator
        .state()
        .is_completed(&format!("{}/slevy/down", base)));
}
