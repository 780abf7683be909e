//! Test utility functions for visuflow scenarios

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use visuflow::core::{
    EvaluationContext, ExecutionStatus, JobConfig, Pipeline, Scope, StepDocument, StepError,
    StepState,
};
use visuflow::execution::{Engine, RunReport};
use visuflow::media::{EncoderInvocation, MediaEncoder};
use visuflow::StepResult;

/// Encoder that records invocations instead of running ffmpeg
///
/// Audio durations come from `durations` by file name, falling back to
/// `default_duration`.
pub struct MockEncoder {
    durations: HashMap<String, f64>,
    default_duration: f64,
    fail_with: Option<i32>,
    invocations: Arc<Mutex<Vec<EncoderInvocation>>>,
}

impl MockEncoder {
    pub fn new() -> Self {
        Self {
            durations: HashMap::new(),
            default_duration: 1.0,
            fail_with: None,
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_duration(mut self, file_name: &str, seconds: f64) -> Self {
        self.durations.insert(file_name.to_string(), seconds);
        self
    }

    /// Make every run exit with `code`
    pub fn failing(mut self, code: i32) -> Self {
        self.fail_with = Some(code);
        self
    }

    /// Shared handle to the recorded invocations
    pub fn invocations(&self) -> Arc<Mutex<Vec<EncoderInvocation>>> {
        self.invocations.clone()
    }
}

#[async_trait]
impl MediaEncoder for MockEncoder {
    async fn audio_duration(&self, path: &Path) -> StepResult<f64> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        Ok(self.durations.get(name).copied().unwrap_or(self.default_duration))
    }

    async fn run(&self, invocation: &EncoderInvocation) -> StepResult<()> {
        self.invocations.lock().unwrap().push(invocation.clone());
        match self.fail_with {
            Some(code) => Err(StepError::Encoding {
                code,
                output: "mock encoder failure".to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Job configuration with every path inside `dir`
pub fn job_config(dir: &TempDir, job_name: &str) -> JobConfig {
    let mut config = JobConfig::new(job_name);
    config.output_path = dir.path().join("out");
    config.temp_path = dir.path().join("temp");
    config.memory_path = dir.path().join("memory");
    config.fixtures_path = dir.path().join("fixtures");
    config
}

/// Result of running a document
pub struct RunOutcome {
    pub pipeline: Pipeline,
    pub result: Result<RunReport, StepError>,
    pub invocations: Vec<EncoderInvocation>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.pipeline.state.status == ExecutionStatus::Completed && self.result.is_ok()
    }

    pub fn report(&self) -> &RunReport {
        match &self.result {
            Ok(report) => report,
            Err(e) => panic!("run failed: {}", e),
        }
    }

    pub fn error(&self) -> &StepError {
        match &self.result {
            Ok(_) => panic!("run succeeded, expected a failure"),
            Err(e) => e,
        }
    }

    /// Final context value at a dot path
    pub fn data_at(&self, path: &str) -> Value {
        let ctx = EvaluationContext::new(JobConfig::default()).with_data(self.report().data.clone());
        ctx.get_data(path, &Scope::root())
            .unwrap_or_else(|e| panic!("no data at '{}': {}", path, e))
    }

    pub fn step_state(&self, index: usize) -> &StepState {
        &self.pipeline.steps[index].state
    }
}

/// Parse a step document
pub fn document(yaml: &str) -> StepDocument {
    StepDocument::from_yaml(yaml).unwrap_or_else(|e| panic!("Failed to parse step document: {}", e))
}

/// Compile and run a document with the given encoder
pub async fn run_document(yaml: &str, config: JobConfig, encoder: MockEncoder) -> RunOutcome {
    let invocations = encoder.invocations();
    let engine = Engine::new(Arc::new(encoder));
    let mut pipeline = engine
        .compile(&document(yaml))
        .unwrap_or_else(|e| panic!("Failed to compile step document: {}", e));

    let result = engine.execute(&mut pipeline, config).await;
    let invocations = invocations.lock().unwrap().clone();

    RunOutcome {
        pipeline,
        result,
        invocations,
    }
}

/// Write `{fixtures_path}/{name}.json`
pub fn write_fixture(config: &JobConfig, name: &str, value: &Value) {
    std::fs::create_dir_all(&config.fixtures_path).unwrap();
    std::fs::write(
        config.fixtures_path.join(format!("{}.json", name)),
        serde_json::to_vec(value).unwrap(),
    )
    .unwrap();
}

/// Value following an argument flag in an encoder invocation
pub fn arg_after<'a>(invocation: &'a EncoderInvocation, flag: &str) -> Option<&'a str> {
    invocation
        .args
        .iter()
        .position(|a| a == flag)
        .and_then(|i| invocation.args.get(i + 1))
        .map(String::as_str)
}

/// Every `-t` duration of an encoder invocation, in input order
pub fn clip_durations(invocation: &EncoderInvocation) -> Vec<String> {
    invocation
        .args
        .windows(2)
        .filter(|pair| pair[0] == "-t")
        .map(|pair| pair[1].clone())
        .collect()
}

pub fn assert_run_completed(outcome: &RunOutcome) {
    assert!(
        outcome.is_success(),
        "Run should have completed, but was {:?}: {:?}",
        outcome.pipeline.state.status,
        outcome.result.as_ref().err()
    );
}

/// Assert the step at `index` failed with an error mentioning `expected`
pub fn assert_step_failed(outcome: &RunOutcome, index: usize, expected: &str) {
    match outcome.step_state(index) {
        StepState::Failed { error, .. } => assert!(
            error.contains(expected),
            "Step #{} error:\n{}\n\ndoes not contain:\n{}",
            index + 1,
            error,
            expected
        ),
        other => panic!("Step #{} should have failed, but was {:?}", index + 1, other),
    }
}

pub fn output_file(dir: &TempDir, job_name: &str) -> PathBuf {
    dir.path().join("out").join(format!("{}.mp4", job_name))
}
