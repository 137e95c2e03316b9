//! Execution core: step contract, definitions, leveling, and the runner.

pub mod definition;
pub mod hooks;
pub mod leveler;
pub mod retry;
pub mod runner;
pub mod step;

pub use definition::{
    PipelineDefinition, Placement, StepEntry, StepMetadata, StepTiming, StepToken, DEFAULT_P50_MS,
};
pub use hooks::{CompositeHook, LoggingHook, PipelineHook};
pub use leveler::build_levels;
pub use retry::{RetryPolicy, RetryStep, RetryStrategy};
pub use runner::{PipelineReport, PipelineRunner, RunStatus, StepFailure};
pub use step::{FnStep, PipelineContext, Step};
