//! Step error taxonomy

use std::fmt;
use thiserror::Error;

/// Which dispatch table a step type belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registry {
    Step,
    Fetch,
    Transform,
    Sequence,
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Registry::Step => "step",
            Registry::Fetch => "fetch",
            Registry::Transform => "transform",
            Registry::Sequence => "sequence",
        };
        f.write_str(name)
    }
}

/// Errors raised while compiling or executing steps
#[derive(Debug, Error)]
pub enum StepError {
    /// A path did not resolve against the loop scopes or the context data
    #[error("could not resolve data path '{path}'")]
    DataResolution { path: String },

    /// Upstream API answered with a non-success status
    #[error("request to {url} failed with status {status}: {body}")]
    ApiRequest {
        url: String,
        status: u16,
        body: String,
    },

    /// Unknown `type` discriminator
    #[error("unknown {registry} type: '{type_name}'")]
    StepType {
        registry: Registry,
        type_name: String,
    },

    /// A fetch variant failed
    #[error("fetch step '{step_type}' ({name}) failed: {source}")]
    Fetch {
        step_type: String,
        name: String,
        #[source]
        source: Box<StepError>,
    },

    /// A transform variant failed
    #[error("transform '{step_type}' on key '{key}' failed: {source}")]
    Transform {
        step_type: String,
        key: String,
        #[source]
        source: Box<StepError>,
    },

    /// The media assembly step failed
    #[error("sequence '{step_type}' failed: {source}")]
    Sequence {
        step_type: String,
        #[source]
        source: Box<StepError>,
    },

    /// External encoder exited with a non-zero status
    #[error("encoder exited with code {code}: {output}")]
    Encoding { code: i32, output: String },

    #[error("'{0}' is not implemented")]
    NotImplemented(String),

    /// Step parameters did not match the declared type
    #[error("invalid '{step_type}' step: {message}")]
    InvalidStep { step_type: String, message: String },

    /// A resolved value had the wrong shape
    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("no API key configured under '{0}'")]
    MissingApiKey(String),

    #[error("no cached data for {0}")]
    CacheMiss(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl StepError {
    pub fn data_resolution(path: impl Into<String>) -> Self {
        Self::DataResolution { path: path.into() }
    }

    pub fn invalid_step(step_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidStep {
            step_type: step_type.into(),
            message: message.into(),
        }
    }

    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn step_type(registry: Registry, type_name: impl Into<String>) -> Self {
        Self::StepType {
            registry,
            type_name: type_name.into(),
        }
    }

    /// The innermost error below the fetch/transform/sequence annotations
    pub fn root_cause(&self) -> &StepError {
        match self {
            StepError::Fetch { source, .. }
            | StepError::Transform { source, .. }
            | StepError::Sequence { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether a `request_memory` lookup may fall back to its alternative
    pub fn is_cache_miss(&self) -> bool {
        matches!(self.root_cause(), StepError::CacheMiss(_))
    }
}

pub type StepResult<T> = Result<T, StepError>;
