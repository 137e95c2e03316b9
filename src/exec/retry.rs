//! Per-step retry composed at registration time.
//!
//! The runner never retries; a step that wants retries is wrapped in
//! [`RetryStep`] when it is registered, and the wrapper's attempts are one
//! logical execution from the scheduler's point of view.

use crate::exec::step::{PipelineContext, Step};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

/// Delay schedule between retry attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RetryStrategy {
    /// Exponential backoff with configurable parameters.
    Exponential {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
    },
    /// Linear backoff with fixed delay.
    Linear { delay_ms: u64 },
    /// No delay between retries.
    Immediate,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_ms: 2000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

/// Calculate retry delay based on strategy.
fn calculate_retry_delay(strategy: &RetryStrategy, attempt: u32) -> u64 {
    match strategy {
        RetryStrategy::Exponential {
            initial_delay_ms,
            max_delay_ms,
            multiplier,
        } => {
            let delay = (*initial_delay_ms as f64 * multiplier.powf(attempt as f64)).round() as u64;
            delay.min(*max_delay_ms)
        }
        RetryStrategy::Linear { delay_ms } => *delay_ms,
        RetryStrategy::Immediate => 0,
    }
}

/// Retry policy: attempt budget plus delay schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategy::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, strategy: RetryStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            strategy,
        }
    }
}

/// Wrapper that re-invokes an inner step per its [`RetryPolicy`].
pub struct RetryStep {
    inner: Arc<dyn Step>,
    policy: RetryPolicy,
}

impl RetryStep {
    pub fn new(inner: Arc<dyn Step>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Convenience constructor returning the wrapper as a step.
    pub fn wrap(inner: Arc<dyn Step>, policy: RetryPolicy) -> Arc<dyn Step> {
        Arc::new(Self::new(inner, policy))
    }
}

#[async_trait]
impl Step for RetryStep {
    async fn run(&self, ctx: Arc<PipelineContext>) -> anyhow::Result<()> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 0..max_attempts {
            match self.inner.run(Arc::clone(&ctx)).await {
                Ok(()) => {
                    if attempt > 0 {
                        info!(attempt = attempt + 1, "step succeeded after retry");
                    }
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        error = %err,
                        "step attempt failed"
                    );
                    last_err = Some(err);

                    // A requested stop also cancels the retry loop.
                    if ctx.stop_requested() {
                        break;
                    }

                    if attempt + 1 < max_attempts {
                        let delay = calculate_retry_delay(&self.policy.strategy, attempt);
                        if delay > 0 {
                            sleep(Duration::from_millis(delay)).await;
                        }
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("retry wrapper ran zero attempts")))
    }
}
