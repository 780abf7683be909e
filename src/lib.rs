//! visuflow - step execution engine that fetches data, transforms it and renders videos

pub mod cli;
pub mod core;
pub mod execution;
pub mod fetch;
pub mod media;
pub mod persistence;
pub mod transform;

// Re-export commonly used types
pub use core::{
    EvaluationContext, ExecutionStatus, JobConfig, Pipeline, Scope, Step, StepDocument, StepError,
    StepResult, StepState,
};
pub use execution::{DispatchTable, Engine, ExecutionEvent, RunReport};
pub use media::{FfmpegEncoder, MediaEncoder};
