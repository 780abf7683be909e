//! Dispatch table mapping `type` discriminators to step kinds

use crate::core::error::{Registry, StepError, StepResult};
use crate::fetch::FetchKind;
use crate::media::SequenceKind;
use crate::transform::TransformKind;
use std::collections::HashMap;

/// What a top-level step `type` dispatches to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Fetch(FetchKind),
    Transform(TransformKind),
    /// `transform` step carrying a `transformation` list
    TransformGroup,
    Sequence,
}

/// Immutable once the engine is constructed
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    steps: HashMap<String, StepKind>,
    fetch: HashMap<String, FetchKind>,
    transform: HashMap<String, TransformKind>,
    sequence: HashMap<String, SequenceKind>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in type registered
    pub fn with_builtin_types() -> Self {
        let mut table = Self::new();
        register_fetch_types(&mut table);
        register_transform_types(&mut table);
        register_sequence_types(&mut table);
        table
    }

    pub fn register_step(&mut self, name: &str, kind: StepKind) {
        self.steps.insert(name.to_string(), kind);
    }

    pub fn register_fetch(&mut self, name: &str, kind: FetchKind) {
        self.fetch.insert(name.to_string(), kind);
        self.register_step(name, StepKind::Fetch(kind));
    }

    pub fn register_transform(&mut self, name: &str, kind: TransformKind) {
        self.transform.insert(name.to_string(), kind);
        self.register_step(name, StepKind::Transform(kind));
    }

    pub fn register_sequence(&mut self, name: &str, kind: SequenceKind) {
        self.sequence.insert(name.to_string(), kind);
    }

    pub fn step(&self, type_name: &str) -> StepResult<StepKind> {
        self.steps
            .get(type_name)
            .copied()
            .ok_or_else(|| StepError::step_type(Registry::Step, type_name))
    }

    pub fn fetch(&self, type_name: &str) -> StepResult<FetchKind> {
        self.fetch
            .get(type_name)
            .copied()
            .ok_or_else(|| StepError::step_type(Registry::Fetch, type_name))
    }

    pub fn transform(&self, type_name: &str) -> StepResult<TransformKind> {
        self.transform
            .get(type_name)
            .copied()
            .ok_or_else(|| StepError::step_type(Registry::Transform, type_name))
    }

    pub fn sequence(&self, type_name: &str) -> StepResult<SequenceKind> {
        self.sequence
            .get(type_name)
            .copied()
            .ok_or_else(|| StepError::step_type(Registry::Sequence, type_name))
    }

    /// Registered top-level type names, sorted
    pub fn step_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

pub fn register_fetch_types(table: &mut DispatchTable) {
    for kind in FetchKind::ALL {
        table.register_fetch(kind.name(), kind);
    }
}

pub fn register_transform_types(table: &mut DispatchTable) {
    for kind in TransformKind::ALL {
        table.register_transform(kind.name(), kind);
    }
    table.register_transform("array", TransformKind::Array);
    table.register_step("transform", StepKind::TransformGroup);
}

pub fn register_sequence_types(table: &mut DispatchTable) {
    for kind in SequenceKind::ALL {
        table.register_sequence(kind.name(), kind);
    }
    table.register_step("sequence", StepKind::Sequence);
}
