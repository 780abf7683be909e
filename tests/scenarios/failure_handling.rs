//! Test: Failure Handling - the first failing step halts the run

use crate::helpers::*;
use assert_matches::assert_matches;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use visuflow::core::{ExecutionStatus, StepState};
use visuflow::execution::{engine::is_unknown_type, Engine};
use visuflow::StepError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// An upstream error fails the request step and skips everything after it
#[tokio::test]
async fn test_api_error_halts_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/forecast"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(1)
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
name: broken
steps:
  - type: request
    name: forecast
    url_pattern: "{uri}/forecast"
  - type: replace
    keys: [_req.text]
    old_value: "-"
    new_value: " "
  - type: input
    key: never
    input: 1
"#,
        uri = server.uri()
    );

    let dir = TempDir::new().unwrap();
    let outcome = run_document(&yaml, job_config(&dir, "broken"), MockEncoder::new()).await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.pipeline.state.status, ExecutionStatus::Failed);
    assert_matches!(
        outcome.error().root_cause(),
        StepError::ApiRequest { status: 500, body, .. } if body == "upstream down"
    );
    assert_step_failed(&outcome, 0, "failed with status 500");
    assert_matches!(outcome.step_state(1), StepState::Skipped { .. });
    assert_matches!(outcome.step_state(2), StepState::Skipped { .. });
    assert_eq!(outcome.pipeline.state.completed_steps, 0);
    assert_eq!(outcome.pipeline.state.failed_steps, 1);
}

/// Unknown types are rejected before any step runs
#[tokio::test]
async fn test_unknown_type_fails_compile() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
name: typo
steps:
  - type: request
    url_pattern: "{uri}/data"
  - type: transform
    transformation:
      - type: replase
        keys: [_req.text]
"#,
        uri = server.uri()
    );

    let engine = Engine::new(Arc::new(MockEncoder::new()));
    let err = engine.compile(&document(&yaml)).unwrap_err();

    assert!(is_unknown_type(&err));
    assert!(err.to_string().contains("replase"));
}

/// Placeholder transforms fail loudly instead of doing nothing
#[tokio::test]
async fn test_unimplemented_transform_fails_step() {
    let yaml = r#"
name: placeholder
steps:
  - type: input
    input: {a: 1}
  - type: alias
    keys: [_req.a]
"#;

    let dir = TempDir::new().unwrap();
    let outcome = run_document(yaml, job_config(&dir, "placeholder"), MockEncoder::new()).await;

    assert_matches!(outcome.error().root_cause(), StepError::NotImplemented(name) if name == "alias");
    assert_matches!(outcome.step_state(0), StepState::Completed { .. });
    assert_step_failed(&outcome, 1, "'alias' is not implemented");
}

/// A failing encoder surfaces its exit code and the temp directory is removed
#[tokio::test]
async fn test_encoder_failure_cleans_temp_dir() {
    let yaml = r#"
name: render
steps:
  - type: sequence
    sequence:
      type: successively
    images:
      first: /img/first.png
    audio:
      audios:
        first: /audio/first.mp3
"#;

    let dir = TempDir::new().unwrap();
    let outcome = run_document(yaml, job_config(&dir, "render"), MockEncoder::new().failing(1)).await;

    assert_matches!(outcome.error().root_cause(), StepError::Encoding { code: 1, .. });
    assert_step_failed(&outcome, 0, "encoder exited with code 1");
    assert_eq!(outcome.invocations.len(), 1);

    let run_dir = dir
        .path()
        .join("temp")
        .join(outcome.pipeline.state.run_id.to_string());
    assert!(!run_dir.exists());
    assert!(!output_file(&dir, "render").exists());
}

/// `{_api_key}` with an unknown credential name fails the step
#[tokio::test]
async fn test_missing_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
name: keyless
steps:
  - type: request
    api_key_name: weather_service
    url_pattern: "{uri}/data?key={{_api_key}}"
"#,
        uri = server.uri()
    );

    let dir = TempDir::new().unwrap();
    let outcome = run_document(&yaml, job_config(&dir, "keyless"), MockEncoder::new()).await;

    assert_matches!(
        outcome.error().root_cause(),
        StepError::MissingApiKey(name) if name == "weather_service"
    );
}

/// Storing a path the run never wrote fails the run after all steps completed
#[tokio::test]
async fn test_storing_missing_key_fails_run() {
    let yaml = r#"
name: forgetful
steps:
  - type: input
    input: 1
storing:
  - name: nothing
    key: not_there
"#;

    let dir = TempDir::new().unwrap();
    let outcome = run_document(yaml, job_config(&dir, "forgetful"), MockEncoder::new()).await;

    assert_matches!(outcome.error(), StepError::DataResolution { path } if path == "not_there");
    assert_matches!(outcome.step_state(0), StepState::Completed { .. });
    assert_eq!(outcome.pipeline.state.status, ExecutionStatus::Failed);
}
