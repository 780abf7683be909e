//! Step execution: type dispatch and the run loop

pub mod engine;
pub mod registry;

pub use engine::{Engine, EventHandler, ExecutionEvent, RunReport};
pub use registry::{DispatchTable, StepKind};
