//! Execution planning: critical-path analysis, mode selection, and the
//! budget-driven fallback chain.

pub mod critical_path;
pub mod fallback;
pub mod mode;
pub mod monitor;

pub use critical_path::{critical_path, CriticalPath, PathTiming};
pub use fallback::{
    FallbackConfig, FallbackOutcome, FallbackRunner, LocalOrchestrator, OrchestratedExecutor,
};
pub use mode::{plan, ExecutionMode, ExecutionPlan, PlannerConfig};
pub use monitor::{BudgetHook, BudgetMonitor};
