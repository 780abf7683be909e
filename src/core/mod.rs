//! Core domain models
//!
//! Step documents and their compiled form, the evaluation context steps read and
//! write, loop scopes, templates and the error taxonomy.

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod scope;
pub mod state;
pub mod step;
pub mod template;

pub use config::{JobConfig, StepConfig, StepDocument, StoringConfig};
pub use context::EvaluationContext;
pub use error::{StepError, StepResult};
pub use pipeline::*;
pub use scope::{LoopScope, Scope};
pub use state::*;
pub use step::*;
