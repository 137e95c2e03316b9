//! Lifecycle hooks for pipeline runs.
//!
//! Hooks observe the run and may mutate the shared context, never the
//! definition. The `before_*` family is failable so a hook can veto
//! progress (the budget monitor raises its exhaustion failure here); the
//! `after_*` family is purely observational.

use crate::error::PipelineError;
use crate::exec::definition::StepToken;
use crate::exec::runner::PipelineReport;
use crate::exec::step::PipelineContext;
use async_trait::async_trait;
use std::sync::Arc;

/// Observer of a single pipeline run. All methods default to no-ops.
#[async_trait]
pub trait PipelineHook: Send + Sync {
    /// Called once before the first level starts.
    async fn before_pipeline(&self, _ctx: &PipelineContext) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Called before each level. An error here fails the level without
    /// starting any of its steps.
    async fn before_level(
        &self,
        _level: &[StepToken],
        _ctx: &PipelineContext,
    ) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Called before each step. An error here is recorded as that step's
    /// failure.
    async fn before_step(
        &self,
        _token: StepToken,
        _ctx: &PipelineContext,
    ) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Called after a step completes successfully.
    async fn after_step(&self, _token: StepToken, _ctx: &PipelineContext) {}

    /// Called when a step fails.
    async fn on_step_error(&self, _token: StepToken, _err: &PipelineError, _ctx: &PipelineContext) {
    }

    /// Called after every step of a level has been awaited.
    async fn after_level(&self, _level: &[StepToken], _ctx: &PipelineContext) {}

    /// Called once with the final report.
    async fn after_pipeline(&self, _report: &PipelineReport) {}
}

/// Fans a run's lifecycle out to several hooks in registration order.
pub struct CompositeHook {
    hooks: Vec<Arc<dyn PipelineHook>>,
}

impl CompositeHook {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn push(&mut self, hook: Arc<dyn PipelineHook>) {
        self.hooks.push(hook);
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl Default for CompositeHook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PipelineHook for CompositeHook {
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

    async fn before_step(
        &self,
        token: StepToken,
        ctx: &PipelineContext,
    ) -> Result<(), PipelineError> {
        for hook in &self.hooks {
            hook.before_step(token, ctx).await?;
        }
        Ok(())
    }

    async fn after_step(&self, token: StepToken, ctx: &PipelineContext) {
        for hook in &self.hooks {
            hook.after_step(token, ctx).await;
        }
    }

    async fn on_step_error(&self, token: StepToken, err: &PipelineError, ctx: &PipelineContext) {
        for hook in &self.hooks {
            hook.on_step_error(token, err, ctx).await;
        }
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

/// Hook that traces the run's lifecycle.
pub struct LoggingHook;

#[async_trait]
impl PipelineHook for LoggingHook {
    async fn before_level(
        &self,
        level: &[StepToken],
        _ctx: &PipelineContext,
    ) -> Result<(), PipelineError> {
        tracing::debug!(steps = level.len(), "starting level");
        Ok(())
    }

    async fn after_step(&self, token: StepToken, _ctx: &PipelineContext) {
        tracing::debug!(%token, "step completed");
    }

    async fn on_step_error(&self, token: StepToken, err: &PipelineError, _ctx: &PipelineContext) {
        tracing::error!(%token, error = %err, "step failed");
    }

    async fn after_pipeline(&self, report: &PipelineReport) {
        tracing::info!(
            status = ?report.status,
            executed = report.executed.len(),
            "pipeline finished"
        );
    }
}
