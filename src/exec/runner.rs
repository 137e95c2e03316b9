//! Level-synchronous parallel execution of a pipeline definition.
//!
//! Levels run sequentially; the steps inside a level all start together and
//! the runner awaits the whole wave before inspecting terminal conditions.
//! Writes from level `i` therefore happen-before reads in level `i + 1`.

use crate::error::PipelineError;
use crate::exec::definition::{PipelineDefinition, StepToken};
use crate::exec::hooks::PipelineHook;
use crate::exec::leveler::build_levels;
use crate::exec::step::PipelineContext;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Terminal status of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// Every level completed, no step raised, no step requested a stop.
    Success,
    /// A step requested a stop; later levels never started.
    Stopped,
    /// At least one step (or a structural check) failed.
    Error,
}

/// One recorded step failure.
#[derive(Debug)]
pub struct StepFailure {
    /// The failing step, or `None` for failures not tied to one step
    /// (structural errors, level-veto failures).
    pub token: Option<StepToken>,
    pub error: PipelineError,
}

/// Structured outcome of a run.
#[derive(Debug)]
pub struct PipelineReport {
    pub status: RunStatus,
    /// The context the run mutated; callers read results from its target.
    pub ctx: Arc<PipelineContext>,
    pub errors: Vec<StepFailure>,
    /// Successfully completed steps in completion order across levels.
    pub executed: Vec<StepToken>,
    /// Every level that was fully awaited, in order, including the level
    /// that produced a terminal condition.
    pub completed_levels: Vec<Vec<StepToken>>,
}

impl PipelineReport {
    /// Whether any recorded failure is a budget exhaustion.
    pub fn budget_exhausted(&self) -> bool {
        self.errors
            .iter()
            .any(|f| matches!(f.error, PipelineError::BudgetExhausted { .. }))
    }
}

/// Executes definitions level by level with optional lifecycle hooks.
#[derive(Default)]
pub struct PipelineRunner {
    hooks: Vec<Arc<dyn PipelineHook>>,
}

impl PipelineRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a lifecycle hook. Hooks run in attachment order.
    pub fn with_hook(mut self, hook: Arc<dyn PipelineHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Run a definition to completion.
    ///
    /// Never returns `Err`: structural failures surface as a report with
    /// `status = Error` and nothing executed; step failures are captured
    /// into `errors` and halt further levels.
    pub async fn run(&self, def: &PipelineDefinition, ctx: Arc<PipelineContext>) -> PipelineReport {
        let levels = match build_levels(def) {
            Ok(levels) => levels,
            Err(err) => {
                warn!(error = %err, "definition rejected");
                ctx.record_error(err.to_string());
                return PipelineReport {
                    status: RunStatus::Error,
                    ctx,
                    errors: vec![StepFailure { token: None, error: err }],
                    executed: Vec::new(),
                    completed_levels: Vec::new(),
                };
            }
        };

        info!(levels = levels.len(), steps = def.len(), "starting pipeline");

        let mut executed: Vec<StepToken> = Vec::with_capacity(def.len());
        let mut errors: Vec<StepFailure> = Vec::new();
        let mut completed_levels: Vec<Vec<StepToken>> = Vec::new();

        if let Err(err) = self.before_pipeline(&ctx).await {
            ctx.record_error(err.to_string());
            errors.push(StepFailure { token: None, error: err });
            let report = PipelineReport {
                status: RunStatus::Error,
                ctx,
                errors,
                executed,
                completed_levels,
            };
            self.after_pipeline(&report).await;
            return report;
        }

        let mut status = RunStatus::Success;

        for level in levels {
            if let Err(err) = self.before_level(&level, &ctx).await {
                ctx.record_error(err.to_string());
                errors.push(StepFailure { token: None, error: err });
                status = RunStatus::Error;
                break;
            }

            // All steps of the wave start together; completion order is
            // whatever the scheduler gives us.
            let mut wave = FuturesUnordered::new();
            for token in &level {
                let token = *token;
                let entry = def
                    .entry(token)
                    .expect("leveler only emits registered tokens");
                let step = Arc::clone(&entry.step);
                let ctx = Arc::clone(&ctx);
                wave.push(async move {
                    let outcome = self.execute_step(token, step, ctx).await;
                    (token, outcome)
                });
            }

            let mut level_failed = false;
            while let Some((token, outcome)) = wave.next().await {
                match outcome {
                    Ok(()) => executed.push(token),
                    Err(err) => {
                        ctx.record_error(err.to_string());
                        errors.push(StepFailure { token: Some(token), error: err });
                        level_failed = true;
                    }
                }
            }

            completed_levels.push(level.clone());
            self.after_level(&level, &ctx).await;

            if level_failed {
                status = RunStatus::Error;
                break;
            }
            if ctx.stop_requested() {
                debug!("stop requested, halting after current level");
                status = RunStatus::Stopped;
                break;
            }
        }

        let report = PipelineReport {
            status,
            ctx,
            errors,
            executed,
            completed_levels,
        };
        self.after_pipeline(&report).await;
        report
    }

    async fn execute_step(
        &self,
        token: StepToken,
        step: Arc<dyn crate::exec::step::Step>,
        ctx: Arc<PipelineContext>,
    ) -> Result<(), PipelineError> {
        for hook in &self.hooks {
            if let Err(err) = hook.before_step(token, &ctx).await {
                self.notify_step_error(token, &err, &ctx).await;
                return Err(err);
            }
        }

        match step.run(Arc::clone(&ctx)).await {
            Ok(()) => {
                for hook in &self.hooks {
                    hook.after_step(token, &ctx).await;
                }
                Ok(())
            }
            Err(err) => {
                let err = PipelineError::StepFailed {
                    step: token.to_string(),
                    message: err.to_string(),
                };
                self.notify_step_error(token, &err, &ctx).await;
                Err(err)
            }
        }
    }

    async fn notify_step_error(&self, token: StepToken, err: &PipelineError, ctx: &PipelineContext) {
        for hook in &self.hooks {
            hook.on_step_error(token, err, ctx).await;
        }
    }

    async fn before_pipeline(&self, ctx: &PipelineContext) -> Result<(), PipelineError> {
        for hook in &self.hooks {
            hook.before_pipeline(ctx).await?;
        }
        Ok(())
    }

    async fn before_level(
        &self,
        level: &[StepToken],
        ctx: &PipelineContext,
    ) -> Result<(), PipelineError> {
        for hook in &self.hooks {
            hook.before_level(level, ctx).await?;
        }
        Ok(())
    }

    async fn after_level(&self, level: &[StepToken], ctx: &PipelineContext) {
        for hook in &self.hooks {
            hook.after_level(level, ctx).await;
        }
    }

    async fn after_pipeline(&self, report: &PipelineReport) {
        for hook in &self.hooks {
            hook.after_pipeline(report).await;
        }
    }
}
