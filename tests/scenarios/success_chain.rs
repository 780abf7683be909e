//! Test: Success Chain - fetch, transform and store in one run

use crate::helpers::*;
use serde_json::{json, Value};
use tempfile::TempDir;
use visuflow::fetch::MemoryCache;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WIND_DICT: &str = r#"
            dict:
              N: [Nord, n, Norden]
              NE: [Nordost, no, Nordosten]"#;

/// A request feeds a looped transform chain; the result is remembered
#[tokio::test]
async fn test_request_transform_store() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/forecast/Berlin"))
        .and(query_param("key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "days": [
                {"date": "2020-06-21", "wind": "N-NE", "summary": "sunny-warm"},
                {"date": "2020-06-22", "wind": "N", "summary": "rain-cold"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
name: weather
steps:
  - type: request
    name: forecast
    url_pattern: "{uri}/forecast/{{_conf.city}}"
    api_key_name: example
    params:
      key: "{{_api_key}}"
  - type: transform
    transformation:
      - type: loop
        values: _req.days
        transformation:
          - type: date_weekday
            keys: [_loop.date]
            new_keys: [_loop.weekday]
            format: "%Y-%m-%d"
          - type: replace
            keys: [_loop.summary]
            old_value: "-"
            new_value: " und "
          - type: wind_direction
            keys: [_loop.wind]
            delimiter: "-"{dict}
storing:
  - name: forecast
"#,
        uri = server.uri(),
        dict = WIND_DICT
    );

    let dir = TempDir::new().unwrap();
    let mut config = job_config(&dir, "berlin");
    config.extra.insert("city".to_string(), json!("Berlin"));
    config.api_keys.insert("example".to_string(), "secret".to_string());

    let outcome = run_document(&yaml, config, MockEncoder::new()).await;

    assert_run_completed(&outcome);
    assert_eq!(outcome.data_at("_req.days.0.weekday"), json!("Sonntag"));
    assert_eq!(outcome.data_at("_req.days.1.weekday"), json!("Montag"));
    assert_eq!(outcome.data_at("_req.days.0.summary"), json!("sunny und warm"));
    assert_eq!(outcome.data_at("_req.days.0.wind"), json!("Nord Nordost"));
    assert_eq!(outcome.data_at("_req.days.1.wind"), json!("Norden"));
    assert!(outcome.invocations.is_empty());

    let report = outcome.report();
    assert_eq!(report.stored.len(), 1);
    let remembered = MemoryCache::new(dir.path().join("memory"))
        .read_last("berlin", "forecast", 1)
        .await
        .unwrap();
    assert_eq!(remembered, report.data["_req"]);
}

/// Testing mode reads fixtures instead of calling the network
#[tokio::test]
async fn test_testing_mode_uses_fixture() {
    let dir = TempDir::new().unwrap();
    let mut config = job_config(&dir, "offline");
    config.testing = true;
    write_fixture(&config, "forecast", &json!({"temp": 18}));

    let yaml = r#"
name: offline
steps:
  - type: request
    name: forecast
    url_pattern: "http://127.0.0.1:9/unreachable"
  - type: add_symbol
    keys: [_req.temp]
    pattern: "{_key} °C"
"#;

    let outcome = run_document(yaml, config, MockEncoder::new()).await;

    assert_run_completed(&outcome);
    assert_eq!(outcome.data_at("_req.temp"), json!("18 °C"));
}

/// Keyed multiple requests collect one response per loop value
#[tokio::test]
async fn test_request_multiple_keyed() {
    let server = MockServer::start().await;
    for city in ["hamburg", "munich"] {
        Mock::given(method("GET"))
            .and(path(format!("/city/{}", city)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": city})))
            .expect(1)
            .mount(&server)
            .await;
    }

    let yaml = format!(
        r#"
name: cities
steps:
  - type: request_multiple
    name: cities
    key: cities
    url_pattern: "{uri}/city/{{_loop}}"
    steps_value: [hamburg, munich]
    use_loop_as_key: true
"#,
        uri = server.uri()
    );

    let dir = TempDir::new().unwrap();
    let outcome = run_document(&yaml, job_config(&dir, "cities"), MockEncoder::new()).await;

    assert_run_completed(&outcome);
    assert_eq!(
        outcome.data_at("cities"),
        json!({"hamburg": {"name": "hamburg"}, "munich": {"name": "munich"}})
    );
}

/// Without keys only the first loop value is requested
#[tokio::test]
async fn test_request_multiple_unkeyed_stops_after_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/city/hamburg"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "hamburg"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/city/munich"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "munich"})))
        .expect(0)
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
name: cities
steps:
  - type: request_multiple
    url_pattern: "{uri}/city/{{_loop}}"
    steps_value: [hamburg, munich]
"#,
        uri = server.uri()
    );

    let dir = TempDir::new().unwrap();
    let outcome = run_document(&yaml, job_config(&dir, "cities"), MockEncoder::new()).await;

    assert_run_completed(&outcome);
    let results: Value = outcome.data_at("_req");
    assert_eq!(results, json!([{"name": "hamburg"}]));
}
