//! Step domain model

use crate::core::config::{StepConfig, DEFAULT_FETCH_KEY};
use crate::core::error::StepResult;
use crate::core::state::StepState;
use crate::execution::registry::{DispatchTable, StepKind};
use crate::fetch::FetchSpec;
use crate::media::SequenceSpec;
use crate::transform::{self, TransformSpec};
use serde::Deserialize;

/// A single type-checked step of a pipeline
#[derive(Debug, Clone)]
pub struct Step {
    /// Position in the document
    pub index: usize,

    /// The `type` discriminator as written
    pub step_type: String,

    /// Declared `name`, if any
    pub name: Option<String>,

    pub action: StepAction,

    /// Runtime state (not serialized)
    pub state: StepState,
}

/// What running a step does
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Fetch a value and store it under `key`
    Fetch { key: String, spec: FetchSpec },
    Transform(TransformSpec),
    /// A `transform` step running its `transformation` list in order
    Transforms(Vec<TransformSpec>),
    Sequence(SequenceSpec),
}

#[derive(Deserialize)]
struct FetchTarget {
    #[serde(default = "default_fetch_key")]
    key: String,
}

fn default_fetch_key() -> String {
    DEFAULT_FETCH_KEY.to_string()
}

impl Step {
    /// Resolve the step's type and compile its parameters
    pub fn compile(index: usize, config: &StepConfig, table: &DispatchTable) -> StepResult<Self> {
        let action = match table.step(&config.step_type)? {
            StepKind::Fetch(_) => {
                let target: FetchTarget = config.parse_params()?;
                StepAction::Fetch {
                    key: target.key,
                    spec: FetchSpec::compile(config, table, None)?,
                }
            }
            StepKind::Transform(_) => StepAction::Transform(TransformSpec::compile(config, table)?),
            StepKind::TransformGroup => StepAction::Transforms(transform::compile_group(config, table)?),
            StepKind::Sequence => StepAction::Sequence(SequenceSpec::compile(config, table)?),
        };

        Ok(Step {
            index,
            step_type: config.step_type.clone(),
            name: config.name().map(str::to_string),
            action,
            state: StepState::Pending,
        })
    }

    /// Human-readable identifier, e.g. `#2 request (forecast)`
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("#{} {} ({})", self.index + 1, self.step_type, name),
            None => format!("#{} {}", self.index + 1, self.step_type),
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self.action, StepAction::Sequence(_))
    }
}
