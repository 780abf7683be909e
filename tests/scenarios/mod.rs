//! Scenario-based tests for visuflow

mod failure_handling;
mod memory_fallback;
mod success_chain;
mod template_resolution;
mod video_assembly;
