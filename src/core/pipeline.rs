//! Pipeline domain model

use crate::core::{
    config::{StepDocument, StoringConfig},
    error::StepResult,
    state::{ExecutionStatus, RunState, StepState},
    step::Step,
};
use crate::execution::registry::DispatchTable;

/// A compiled step document
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,

    pub description: Option<String>,

    /// Steps in execution order
    pub steps: Vec<Step>,

    /// Values written to the memory cache after a successful run
    pub storing: Vec<StoringConfig>,

    /// Execution state
    pub state: RunState,
}

impl Pipeline {
    /// Compile every step of a document
    ///
    /// Fails on the first unknown type or malformed step, before anything runs.
    pub fn compile(document: &StepDocument, table: &DispatchTable) -> StepResult<Self> {
        let steps = document
            .steps
            .iter()
            .enumerate()
            .map(|(index, config)| Step::compile(index, config, table))
            .collect::<StepResult<Vec<_>>>()?;

        Ok(Pipeline {
            name: document.name.clone(),
            description: document.description.clone(),
            steps,
            storing: document.storing.clone(),
            state: RunState::new(),
        })
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn step_mut(&mut self, index: usize) -> Option<&mut Step> {
        self.steps.get_mut(index)
    }

    /// Check if every step reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.state.is_terminal())
    }

    pub fn has_failed(&self) -> bool {
        self.state.status == ExecutionStatus::Failed
    }

    /// The step that halted the run, if any
    pub fn failed_step(&self) -> Option<&Step> {
        self.steps
            .iter()
            .find(|s| matches!(s.state, StepState::Failed { .. }))
    }

    /// Put every step back to pending for another run
    pub fn reset(&mut self) {
        for step in &mut self.steps {
            step.state = StepState::Pending;
        }
        self.state = RunState::new();
    }

    pub fn tally(&mut self) {
        self.state.tally(self.steps.iter().map(|s| &s.state));
    }
}
