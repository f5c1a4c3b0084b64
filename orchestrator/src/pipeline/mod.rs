//! Ordered, skippable bootstrap steps.

/// Pipeline runner, state and report
pub mod runner;
/// Skippable pipeline steps
pub mod step;

pub use runner::{CleanupHook, Pipeline, PipelineReport, PipelineState, StepOutcome, StepRecord};
pub use step::{PipelineStep, SkipCheck, StepTask};
