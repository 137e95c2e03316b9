//! Topological leveling of a pipeline definition.
//!
//! Levels are built Kahn-style: each wave collects every remaining step
//! whose dependencies are already resolved. The wave order doubles as the
//! execution schedule, so tests rely on the within-level ordering being the
//! definition's insertion order.

use crate::error::PipelineError;
use crate::exec::definition::{PipelineDefinition, StepToken};
use std::collections::HashSet;

/// Group a definition into an ordered list of mutually independent levels.
///
/// Guarantees on success:
/// - the union of all levels is exactly the definition's tokens,
/// - every token appears in exactly one level,
/// - for every dependency edge `u -> v`, `level(u) < level(v)`,
/// - no dependency edge crosses a pair within one level.
pub fn build_levels(def: &PipelineDefinition) -> Result<Vec<Vec<StepToken>>, PipelineError> {
    let mut seen = HashSet::with_capacity(def.len());
    for entry in def.entries() {
        if !seen.insert(entry.token) {
            return Err(PipelineError::DuplicateRegistration(entry.token.to_string()));
        }
    }
    for entry in def.entries() {
        for dep in &entry.depends_on {
            if !seen.contains(dep) {
                return Err(PipelineError::UnknownDependency {
                    step: entry.token.to_string(),
                });
            }
        }
    }

    let mut levels: Vec<Vec<StepToken>> = Vec::new();
    let mut resolved: HashSet<StepToken> = HashSet::with_capacity(def.len());
    let mut remaining: Vec<&crate::exec::definition::StepEntry> = def.entries().iter().collect();

    while !remaining.is_empty() {
        let mut wave = Vec::new();
        let mut rest = Vec::with_capacity(remaining.len());
        for entry in remaining {
            if entry.depends_on.iter().all(|d| resolved.contains(d)) {
                wave.push(entry.token);
            } else {
                rest.push(entry);
            }
        }

        if wave.is_empty() {
            let stuck: Vec<String> = rest.iter().map(|e| e.token.to_string()).collect();
            return Err(PipelineError::Cycle(stuck.join(", ")));
        }

        resolved.extend(wave.iter().copied());
        levels.push(wave);
        remaining = rest;
    }

    Ok(levels)
}
