//! Virta - a typed DAG pipeline scheduler with a neutral workflow model
//! and an execution planner.
//!
//! The crate has three tightly coupled subsystems:
//!
//! - [`exec`]: the scheduler core. A [`PipelineDefinition`] describes a DAG
//!   over opaque step tokens; [`build_levels`] groups it into waves of
//!   mutually independent steps and [`PipelineRunner`] executes the waves
//!   level-synchronously, steps within a level concurrently.
//! - [`model`] and [`adapters`]: a neutral [`FlowGraph`] that round-trips
//!   with three external dialects (a state-machine JSON, a scenario JSON,
//!   and a BPMN-like process XML), plus the [`StepRegistry`] that bridges
//!   string-keyed dialects to token-keyed definitions.
//! - [`planner`]: critical-path analysis under per-step timing metadata,
//!   selection among inline / orchestrated / hybrid execution, and a
//!   budget-monitored fallback chain.
//!
//! Concurrent steps within a level share one [`PipelineContext`]; writes
//! from level `i` happen-before reads in level `i + 1`, and steps in the
//! same level must keep to disjoint `target` keys. The engine enforces
//! dependency ordering, not field disjointness.

pub mod adapters;
pub mod error;
pub mod exec;
pub mod model;
pub mod planner;
pub mod storage;

pub use adapters::{
    AdapterWarning, ExportOptions, ExportOutcome, ImportOutcome, ProcessXmlAdapter,
    ScenarioAdapter, StateMachineAdapter,
};
pub use error::PipelineError;
pub use exec::{
    build_levels, CompositeHook, FnStep, LoggingHook, PipelineContext, PipelineDefinition,
    PipelineHook, PipelineReport, PipelineRunner, Placement, RetryPolicy, RetryStep,
    RetryStrategy, RunStatus, Step, StepEntry, StepFailure, StepMetadata, StepTiming, StepToken,
};
pub use model::{to_definition, to_flow_graph, FlowGraph, FlowNode, NodeKind, StepRegistry};
pub use planner::{
    critical_path, plan, BudgetHook, BudgetMonitor, CriticalPath, ExecutionMode, ExecutionPlan,
    FallbackConfig, FallbackOutcome, FallbackRunner, LocalOrchestrator, OrchestratedExecutor,
    PathTiming, PlannerConfig,
};
pub use storage::{MemoryPipelineStore, PipelineRecord, PipelineStore, PipelineSummary};
