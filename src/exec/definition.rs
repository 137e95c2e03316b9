//! Pipeline definitions: an ordered list of steps with token identity.
//!
//! A definition is a description of a DAG over step identities. It is
//! deliberately dumb: dependency and uniqueness invariants are validated by
//! the leveler when levels are built, not at insertion time.

use crate::exec::step::Step;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque construction token identifying one step within a definition.
///
/// Tokens are allocated from a process-global counter; the scheduler only
/// relies on them being hashable and unique per allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepToken(u64);

impl StepToken {
    /// Allocate a fresh token.
    pub fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for StepToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step#{}", self.0)
    }
}

/// Where a step is allowed to execute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    /// Must run in the inline worker pool.
    InlineOnly,
    /// Must run on the orchestrated service.
    OrchestratedOnly,
    /// The planner decides.
    #[default]
    Auto,
}

/// Expected per-step wall-clock timings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTiming {
    /// Median duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p50_ms: Option<u64>,
    /// Pessimistic (p99) duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p99_ms: Option<u64>,
}

/// Default p50 used when a step declares no timing.
pub const DEFAULT_P50_MS: u64 = 1000;

impl StepTiming {
    /// Effective optimistic duration, with the documented default.
    pub fn optimistic_ms(&self) -> u64 {
        self.p50_ms.unwrap_or(DEFAULT_P50_MS)
    }

    /// Effective pessimistic duration; defaults to twice the optimistic.
    pub fn pessimistic_ms(&self) -> u64 {
        self.p99_ms.unwrap_or_else(|| self.optimistic_ms() * 2)
    }
}

/// Optional planner-facing metadata for a registered step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetadata {
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub timing: StepTiming,
}

/// One registered step inside a definition.
#[derive(Clone)]
pub struct StepEntry {
    pub token: StepToken,
    pub step: Arc<dyn Step>,
    /// Tokens of steps that must complete before this one starts.
    pub depends_on: Vec<StepToken>,
    pub metadata: Option<StepMetadata>,
}

impl std::fmt::Debug for StepEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepEntry")
            .field("token", &self.token)
            .field("depends_on", &self.depends_on)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// An ordered sequence of registered steps forming a DAG by dependency.
///
/// Insertion order is meaningful: within a level the runner starts steps in
/// the order they were added here.
#[derive(Clone, Debug, Default)]
pub struct PipelineDefinition {
    entries: Vec<StepEntry>,
}

impl PipelineDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step with no dependencies, returning its fresh token.
    pub fn add_step(&mut self, step: Arc<dyn Step>) -> StepToken {
        self.add_step_with(step, &[], None)
    }

    /// Add a step depending on earlier tokens.
    pub fn add_step_after(&mut self, step: Arc<dyn Step>, deps: &[StepToken]) -> StepToken {
        self.add_step_with(step, deps, None)
    }

    /// Add a step with dependencies and metadata.
    pub fn add_step_with(
        &mut self,
        step: Arc<dyn Step>,
        deps: &[StepToken],
        metadata: Option<StepMetadata>,
    ) -> StepToken {
        let token = StepToken::next();
        self.entries.push(StepEntry {
            token,
            step,
            depends_on: deps.to_vec(),
            metadata,
        });
        token
    }

    /// Add a fully specified entry. Used by conversions that carry
    /// registry-assigned tokens; duplicates surface at level-build time.
    pub fn push_entry(&mut self, entry: StepEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[StepEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by token.
    pub fn entry(&self, token: StepToken) -> Option<&StepEntry> {
        self.entries.iter().find(|e| e.token == token)
    }

    /// Effective metadata for a token (registered or default).
    pub fn metadata_for(&self, token: StepToken) -> StepMetadata {
        self.entry(token)
            .and_then(|e| e.metadata)
            .unwrap_or_default()
    }

    /// Restrict the definition to a subset of tokens, keeping order and
    /// dropping edges that point outside the subset.
    pub fn subset(&self, keep: &std::collections::HashSet<StepToken>) -> PipelineDefinition {
        let entries = self
            .entries
            .iter()
            .filter(|e| keep.contains(&e.token))
            .map(|e| StepEntry {
                token: e.token,
                step: Arc::clone(&e.step),
                depends_on: e
                    .depends_on
                    .iter()
                    .copied()
                    .filter(|d| keep.contains(d))
                    .collect(),
                metadata: e.metadata,
            })
            .collect();
        PipelineDefinition { entries }
    }
}
