//! Test: Template Resolution - placeholders across steps and reserved bindings

use crate::helpers::*;
use assert_matches::assert_matches;
use serde_json::json;
use tempfile::TempDir;
use visuflow::StepError;

/// `_conf` and `_run_id` resolve inside any template
#[tokio::test]
async fn test_reserved_bindings() {
    let yaml = r#"
name: reserved
steps:
  - type: input
    input:
      city: "{_conf.city}"
      run: "{_run_id}"
      title: "Wetter in {_conf.city}"
"#;

    let dir = TempDir::new().unwrap();
    let mut config = job_config(&dir, "reserved");
    config.extra.insert("city".to_string(), json!("Gießen"));

    let outcome = run_document(yaml, config, MockEncoder::new()).await;

    assert_run_completed(&outcome);
    assert_eq!(outcome.data_at("_req.city"), json!("Gießen"));
    assert_eq!(outcome.data_at("_req.title"), json!("Wetter in Gießen"));
    assert_eq!(
        outcome.data_at("_req.run"),
        json!(outcome.report().run_id.to_string())
    );
}

/// A lone placeholder keeps the value's type; mixed text renders it
#[tokio::test]
async fn test_typed_and_interpolated_values() {
    let yaml = r#"
name: typed
steps:
  - type: input
    key: raw
    input:
      temps: [12.345, 8.0]
      count: 3
  - type: input
    key: out
    input:
      temps: "{raw.temps}"
      count: "{raw.count}"
      first: "{raw.temps.0:.1f} °C"
      braces: "{{literal}} {raw.count}"
"#;

    let dir = TempDir::new().unwrap();
    let outcome = run_document(yaml, job_config(&dir, "typed"), MockEncoder::new()).await;

    assert_run_completed(&outcome);
    assert_eq!(outcome.data_at("out.temps"), json!([12.345, 8.0]));
    assert_eq!(outcome.data_at("out.count"), json!(3));
    assert_eq!(outcome.data_at("out.first"), json!("12.3 °C"));
    assert_eq!(outcome.data_at("out.braces"), json!("{literal} 3"));
}

/// Loop bindings reach nested transforms; `_idx` is the innermost index, here the key's
#[tokio::test]
async fn test_loop_bindings_in_transforms() {
    let yaml = r#"
name: looped
steps:
  - type: input
    input:
      days:
        - {max: 21, min: 9}
        - {max: 18, min: 7}
  - type: transform
    transformation:
      - type: loop
        values: _req.days
        transformation:
          - type: add_symbol
            keys: [_loop.max]
            new_keys: [_loop.label]
            pattern: "Tag {_idx}: {_loop.max}/{_loop.min}"
"#;

    let dir = TempDir::new().unwrap();
    let outcome = run_document(yaml, job_config(&dir, "looped"), MockEncoder::new()).await;

    assert_run_completed(&outcome);
    assert_eq!(outcome.data_at("_req.days.0.label"), json!("Tag 0: 21/9"));
    assert_eq!(outcome.data_at("_req.days.1.label"), json!("Tag 0: 18/7"));
}

/// Writing into the job configuration is refused
#[tokio::test]
async fn test_conf_is_read_only() {
    let yaml = r#"
name: readonly
steps:
  - type: input
    key: _conf.city
    input: Berlin
"#;

    let dir = TempDir::new().unwrap();
    let mut config = job_config(&dir, "readonly");
    config.extra.insert("city".to_string(), json!("Gießen"));

    let outcome = run_document(yaml, config, MockEncoder::new()).await;

    assert_matches!(
        outcome.error(),
        StepError::Fetch { step_type, name, .. } if step_type == "input" && name == "input"
    );
    assert_matches!(
        outcome.error().root_cause(),
        StepError::InvalidValue { field, message } if field == "_conf.city" && message.contains("read-only")
    );
    assert_step_failed(&outcome, 0, "fetch step 'input' (input) failed");
}

/// An unresolved placeholder names the missing path
#[tokio::test]
async fn test_unresolved_placeholder() {
    let yaml = r#"
name: unresolved
steps:
  - type: input
    input: "{_req.nothing}"
"#;

    let dir = TempDir::new().unwrap();
    let outcome = run_document(yaml, job_config(&dir, "unresolved"), MockEncoder::new()).await;

    assert_matches!(
        outcome.error().root_cause(),
        StepError::DataResolution { path } if path == "_req.nothing"
    );
}
