//! Test: Memory Fallback - cached snapshots and their alternatives

use crate::helpers::*;
use assert_matches::assert_matches;
use chrono::{Duration, Local};
use serde_json::json;
use tempfile::TempDir;
use visuflow::fetch::MemoryCache;
use visuflow::StepError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn memory_document(uri: &str) -> String {
    format!(
        r#"
name: remembered
steps:
  - type: request_memory
    name: history
    alternative:
      type: request
      url_pattern: "{uri}/history"
storing:
  - name: history
"#,
        uri = uri
    )
}

/// A cache miss calls the alternative once; the next run reads the snapshot
#[tokio::test]
async fn test_alternative_then_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"temp": [10, 12]})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let yaml = memory_document(&server.uri());

    let first = run_document(&yaml, job_config(&dir, "remembered"), MockEncoder::new()).await;
    assert_run_completed(&first);
    assert_eq!(first.data_at("_req.temp"), json!([10, 12]));
    assert_eq!(first.report().stored.len(), 1);

    let second = run_document(&yaml, job_config(&dir, "remembered"), MockEncoder::new()).await;
    assert_run_completed(&second);
    assert_eq!(second.data_at("_req.temp"), json!([10, 12]));
}

/// Without an alternative a cold cache fails the step
#[tokio::test]
async fn test_cache_miss_without_alternative() {
    let yaml = r#"
name: cold
steps:
  - type: request_memory
    name: history
"#;

    let dir = TempDir::new().unwrap();
    let outcome = run_document(yaml, job_config(&dir, "cold"), MockEncoder::new()).await;

    assert!(outcome.error().is_cache_miss());
    assert_matches!(outcome.error(), StepError::Fetch { step_type, name, .. }
        if step_type == "request_memory" && name == "history");
    assert_step_failed(&outcome, 0, "no cached data for cold/history");
}

/// `use_last` counts back from the newest snapshot
#[tokio::test]
async fn test_use_last_reads_older_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = job_config(&dir, "older");
    let cache = MemoryCache::new(&config.memory_path);
    let now = Local::now();
    cache
        .store("older", "history", &json!("yesterday"), now - Duration::days(1))
        .await
        .unwrap();
    cache.store("older", "history", &json!("today"), now).await.unwrap();

    let yaml = r#"
name: older
steps:
  - type: request_memory
    name: history
    use_last: 2
    key: previous
"#;

    let outcome = run_document(yaml, config, MockEncoder::new()).await;

    assert_run_completed(&outcome);
    assert_eq!(outcome.data_at("previous"), json!("yesterday"));
}

/// `timedelta` picks the snapshot closest to that many days ago
#[tokio::test]
async fn test_timedelta_picks_closest_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = job_config(&dir, "weekly");
    let cache = MemoryCache::new(&config.memory_path);
    let now = Local::now();
    for (days, label) in [(1, "one"), (6, "six"), (14, "fourteen")] {
        cache
            .store("weekly", "history", &json!(label), now - Duration::days(days))
            .await
            .unwrap();
    }

    let yaml = r#"
name: weekly
steps:
  - type: request_memory
    name: history
    timedelta: 7
"#;

    let outcome = run_document(yaml, config, MockEncoder::new()).await;

    assert_run_completed(&outcome);
    assert_eq!(outcome.data_at("_req"), json!("six"));
}
