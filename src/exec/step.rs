//! Step contract and the shared execution context.
//!
//! Steps are compute-only: they read `source`, write their slice of
//! `target`, and may request a cooperative stop. State transitions of the
//! run itself (level advancement, terminal status) belong to the runner.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared context for one pipeline run.
///
/// The context is owned by exactly one run and shared across the steps of
/// that run via `Arc`. Writes from one level are visible to every later
/// level; within a level, steps must keep to disjoint `target` keys (the
/// engine does not enforce field disjointness, see crate docs).
pub struct PipelineContext {
    /// Immutable input payload for the whole run.
    pub source: Value,
    /// Accumulator the steps progressively fill, keyed by step-owned names.
    pub target: DashMap<String, Value>,
    stop: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl PipelineContext {
    /// Create a context over an input payload with an empty accumulator.
    pub fn new(source: Value) -> Arc<Self> {
        Arc::new(Self {
            source,
            target: DashMap::new(),
            stop: AtomicBool::new(false),
            last_error: Mutex::new(None),
        })
    }

    /// Create a context seeding the accumulator from a previous run's
    /// target, used when one stage hands off to another.
    pub fn with_target(source: Value, target: DashMap<String, Value>) -> Arc<Self> {
        Arc::new(Self {
            source,
            target,
            stop: AtomicBool::new(false),
            last_error: Mutex::new(None),
        })
    }

    /// Request a cooperative stop. Once set the flag never clears; the
    /// runner finishes the current level and terminates with `Stopped`.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Last failure message recorded by the runner, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub(crate) fn record_error(&self, message: String) {
        let mut slot = self.last_error.lock();
        if slot.is_none() {
            *slot = Some(message);
        }
    }

    /// Write one accumulator entry.
    pub fn set_target<T: serde::Serialize>(&self, key: &str, value: T) -> anyhow::Result<()> {
        let value = serde_json::to_value(value)?;
        self.target.insert(key.to_string(), value);
        Ok(())
    }

    /// Read one accumulator entry.
    pub fn get_target<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.target
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Snapshot the accumulator into a plain JSON object.
    pub fn target_snapshot(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .target
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        Value::Object(map)
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("source", &self.source)
            .field("target_len", &self.target.len())
            .field("stop", &self.stop_requested())
            .field("last_error", &self.last_error())
            .finish()
    }
}

/// One unit of work in a pipeline.
///
/// Implementations must be `Send + Sync`; the same instance may be shared
/// across definitions. Failures are plain `anyhow` errors; the runner folds
/// them into the run report rather than propagating.
#[async_trait]
pub trait Step: Send + Sync {
    /// Execute against the shared context.
    async fn run(&self, ctx: Arc<PipelineContext>) -> anyhow::Result<()>;
}

/// A step built from a closure, mostly for wiring and tests.
pub struct FnStep<F>(pub F);

#[async_trait]
impl<F, Fut> Step for FnStep<F>
where
    F: Fn(Arc<PipelineContext>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: Arc<PipelineContext>) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}
