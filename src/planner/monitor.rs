//! Wall-clock budget tracking for a run.
//!
//! The monitor itself never interrupts anything: its exhaustion state is
//! surfaced through [`BudgetHook`] at level and step boundaries, so steps
//! never observe a budget failure mid-execution unless they cooperate.

use crate::error::PipelineError;
use crate::exec::definition::StepToken;
use crate::exec::hooks::PipelineHook;
use crate::exec::step::PipelineContext;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::warn;

/// Remaining time below which the budget counts as exhausted. Keeps timer
/// quantization from letting a run squeeze one more level in.
const EXHAUSTION_THRESHOLD_MS: u64 = 10;

/// Tracks one run's wall-clock budget.
pub struct BudgetMonitor {
    budget: Duration,
    warning_fraction: f64,
    started: Instant,
    warned: Arc<AtomicBool>,
}

impl BudgetMonitor {
    /// Start tracking now with the default warning fraction of 0.8.
    pub fn new(budget_ms: u64) -> Self {
        Self::with_warning_fraction(budget_ms, 0.8)
    }

    pub fn with_warning_fraction(budget_ms: u64, warning_fraction: f64) -> Self {
        Self {
            budget: Duration::from_millis(budget_ms),
            warning_fraction,
            started: Instant::now(),
            warned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn budget_ms(&self) -> u64 {
        self.budget.as_millis() as u64
    }

    /// Milliseconds left before the budget runs out.
    pub fn remaining_ms(&self) -> u64 {
        self.budget
            .saturating_sub(self.started.elapsed())
            .as_millis() as u64
    }

    /// Whether the budget should be treated as gone.
    pub fn is_exhausted(&self) -> bool {
        self.remaining_ms() <= EXHAUSTION_THRESHOLD_MS
    }

    /// Register a one-shot warning callback.
    ///
    /// The callback fires exactly once, at or after `warning_fraction` of
    /// the budget has elapsed, even when several callbacks are registered.
    pub fn on_warning<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let threshold =
            Duration::from_millis((self.budget.as_millis() as f64 * self.warning_fraction) as u64);
        let deadline = self.started + threshold;
        let warned = Arc::clone(&self.warned);
        tokio::spawn(async move {
            sleep_until(deadline).await;
            if !warned.swap(true, Ordering::SeqCst) {
                callback();
            }
        });
    }
}

impl std::fmt::Debug for BudgetMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetMonitor")
            .field("budget_ms", &self.budget_ms())
            .field("remaining_ms", &self.remaining_ms())
            .finish()
    }
}

/// Hook that fails level and step starts once the budget is exhausted.
pub struct BudgetHook {
    monitor: Arc<BudgetMonitor>,
}

impl BudgetHook {
    pub fn new(monitor: Arc<BudgetMonitor>) -> Self {
        Self { monitor }
    }

    fn check(&self) -> Result<(), PipelineError> {
        if self.monitor.is_exhausted() {
            let remaining_ms = self.monitor.remaining_ms();
            warn!(remaining_ms, "budget exhausted, refusing further work");
            return Err(PipelineError::BudgetExhausted { remaining_ms });
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineHook for BudgetHook {
    async fn before_level(
        &self,
        _level: &[StepToken],
        _ctx: &PipelineContext,
    ) -> Result<(), PipelineError> {
        self.check()
    }

    async fn before_step(
        &self,
        _token: StepToken,
        _ctx: &PipelineContext,
    ) -> Result<(), PipelineError> {
        self.check()
    }
}
