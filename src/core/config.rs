//! Step documents and job configuration from YAML

use crate::core::error::{StepError, StepResult};
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Key fetch steps write to unless they declare their own
pub const DEFAULT_FETCH_KEY: &str = "_req";

/// Top-level step document loaded from YAML or JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDocument {
    /// Document name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Steps, executed in order
    pub steps: Vec<StepConfig>,

    /// Values persisted to the memory cache after a successful run
    #[serde(default)]
    pub storing: Vec<StoringConfig>,
}

/// A single step as written in the document: a `type` plus free-form parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Type discriminator
    #[serde(rename = "type")]
    pub step_type: String,

    /// Everything else
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// A context value to remember for later runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoringConfig {
    /// Data name in the memory cache
    pub name: String,

    /// Context path holding the value
    #[serde(default = "default_fetch_key")]
    pub key: String,
}

fn default_fetch_key() -> String {
    DEFAULT_FETCH_KEY.to_string()
}

impl StepConfig {
    pub fn new(step_type: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            step_type: step_type.into(),
            params,
        }
    }

    /// Declared `name`, if any
    pub fn name(&self) -> Option<&str> {
        self.params.get("name").and_then(Value::as_str)
    }

    /// Deserialize the parameters into the typed spec of this step's variant
    pub fn parse_params<T: DeserializeOwned>(&self) -> StepResult<T> {
        serde_json::from_value(Value::Object(self.params.clone()))
            .map_err(|e| StepError::invalid_step(&self.step_type, e.to_string()))
    }
}

impl StepDocument {
    /// Load a step document from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a step document (JSON is valid YAML)
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let document: StepDocument = serde_yaml::from_str(yaml)?;
        document.validate()?;
        Ok(document)
    }

    /// Structural checks; step types are checked when the document is compiled
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Step document has an empty name");
        }

        for (idx, step) in self.steps.iter().enumerate() {
            if step.step_type.trim().is_empty() {
                anyhow::bail!("Step #{} has an empty type", idx + 1);
            }
        }

        let mut seen = std::collections::HashSet::new();
        for storing in &self.storing {
            if !seen.insert(&storing.name) {
                anyhow::bail!("Duplicate storing name: {}", storing.name);
            }
        }

        Ok(())
    }
}

/// Read-only configuration of one job run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job name, used for the memory cache and the output file
    #[serde(default = "default_job_name")]
    pub job_name: String,

    /// Directory the finished video is written to
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    /// Root for per-run temporary files
    #[serde(default = "default_temp_path")]
    pub temp_path: PathBuf,

    /// Root of the memory cache
    #[serde(default = "default_memory_path")]
    pub memory_path: PathBuf,

    /// Fixture documents used in testing mode
    #[serde(default = "default_fixtures_path")]
    pub fixtures_path: PathBuf,

    /// Replace network requests with fixtures
    #[serde(default)]
    pub testing: bool,

    /// Encode with the NVENC hardware encoder
    #[serde(default)]
    pub h264_nvenc: bool,

    /// Append a timestamp to the output file name
    #[serde(default)]
    pub out_time: bool,

    /// API credentials by name
    #[serde(default, skip_serializing)]
    pub api_keys: HashMap<String, String>,

    /// Any other job parameter, readable from templates as `_conf.<key>`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn data_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("visuflow")
}

fn default_job_name() -> String {
    "job".to_string()
}

fn default_output_path() -> PathBuf {
    data_root().join("out")
}

fn default_temp_path() -> PathBuf {
    data_root().join("temp")
}

fn default_memory_path() -> PathBuf {
    data_root().join("memory")
}

fn default_fixtures_path() -> PathBuf {
    data_root().join("exampledata")
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            job_name: default_job_name(),
            output_path: default_output_path(),
            temp_path: default_temp_path(),
            memory_path: default_memory_path(),
            fixtures_path: default_fixtures_path(),
            testing: false,
            h264_nvenc: false,
            out_time: false,
            api_keys: HashMap::new(),
            extra: Map::new(),
        }
    }
}

impl JobConfig {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            ..Self::default()
        }
    }

    /// Load job configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: JobConfig = serde_yaml::from_str(yaml)?;
        if config.job_name.trim().is_empty() {
            anyhow::bail!("job_name must not be empty");
        }
        Ok(config)
    }

    /// Apply a `key=value` override; the value is read as a YAML scalar
    pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        let value: Value = serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        let mut current = serde_json::to_value(&*self)?;
        if let Value::Object(map) = &mut current {
            map.insert(key.to_string(), value);
        }
        let api_keys = std::mem::take(&mut self.api_keys);
        *self = serde_json::from_value(current)?;
        self.api_keys = api_keys;
        Ok(())
    }

    /// Look up an API credential
    pub fn api_key(&self, name: &str) -> StepResult<String> {
        self.api_keys
            .get(name)
            .cloned()
            .ok_or_else(|| StepError::MissingApiKey(name.to_string()))
    }

    /// Configuration as a value tree for `_conf` lookups (credentials excluded)
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}
