//! Execution-mode selection over a planned graph.
//!
//! The selector applies its rules in a fixed order so the same inputs
//! always produce the same mode and the same reasoning trail: placement
//! constraints first, then the safe-budget comparison, then the hybrid
//! cut, and inline only when nothing else fired.

use crate::error::PipelineError;
use crate::exec::definition::{Placement, StepMetadata};
use crate::model::graph::FlowGraph;
use crate::planner::critical_path::{critical_path, CriticalPath};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Where a pipeline run is executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// In-process worker pool.
    Inline,
    /// Remote orchestrated service.
    Orchestrated,
    /// Inline prefix handing off to an orchestrated suffix.
    Hybrid,
    /// Let the fallback runner walk the chain.
    Auto,
}

/// Selector configuration.
#[derive(Clone, Debug)]
pub struct PlannerConfig {
    /// Wall-clock envelope for the run, in milliseconds.
    pub budget_ms: u64,
    /// Force a mode instead of applying the rules.
    pub default_mode: Option<ExecutionMode>,
    /// Fraction of the budget held back as headroom.
    pub safety_margin: f64,
}

impl PlannerConfig {
    pub fn new(budget_ms: u64) -> Self {
        Self {
            budget_ms,
            default_mode: None,
            safety_margin: 0.1,
        }
    }

    pub fn safe_budget_ms(&self) -> f64 {
        self.budget_ms as f64 * (1.0 - self.safety_margin)
    }
}

/// The selector's decision, JSON-serializable with stable field names.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub mode: ExecutionMode,
    pub critical_path: CriticalPath,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_nodes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestrated_nodes: Option<Vec<String>>,
    pub reasoning: Vec<String>,
}

/// Choose an execution mode for the graph under the given budget.
pub fn plan(
    graph: &FlowGraph,
    metadata: &HashMap<String, StepMetadata>,
    cfg: &PlannerConfig,
) -> Result<ExecutionPlan, PipelineError> {
    let path = critical_path(graph, metadata)?;
    let safe_budget = cfg.safe_budget_ms();
    let mut reasoning = Vec::new();

    if let Some(mode) = cfg.default_mode {
        if mode != ExecutionMode::Auto {
            reasoning.push(format!("default mode {:?} forced by configuration", mode));
            let (inline_nodes, orchestrated_nodes) = match mode {
                ExecutionMode::Hybrid => match hybrid_cut(graph, &path, metadata, safe_budget) {
                    Some((inline, orch)) => (Some(inline), Some(orch)),
                    None => {
                        return Err(PipelineError::NoCutFound(
                            "forced hybrid mode but the critical path admits no cut".to_string(),
                        ))
                    }
                },
                _ => (None, None),
            };
            return Ok(ExecutionPlan {
                mode,
                critical_path: path,
                inline_nodes,
                orchestrated_nodes,
                reasoning,
            });
        }
    }

    // Rule 1: a single orchestrated-only step pins the whole run.
    if let Some(id) = graph.nodes.iter().find_map(|n| {
        metadata
            .get(&n.id)
            .filter(|m| m.placement == Placement::OrchestratedOnly)
            .map(|_| n.id.clone())
    }) {
        reasoning.push(format!("node '{id}' is orchestrated-only"));
        return Ok(ExecutionPlan {
            mode: ExecutionMode::Orchestrated,
            critical_path: path,
            inline_nodes: None,
            orchestrated_nodes: None,
            reasoning,
        });
    }

    let pess = path.timing.pessimistic_ms as f64;

    // Rule 2: the pessimistic path does not fit the safe budget.
    if pess >= safe_budget {
        reasoning.push(format!(
            "critical path p99 {}ms meets or exceeds safe budget {}ms",
            path.timing.pessimistic_ms,
            safe_budget.round() as u64
        ));
        return Ok(ExecutionPlan {
            mode: ExecutionMode::Orchestrated,
            critical_path: path,
            inline_nodes: None,
            orchestrated_nodes: None,
            reasoning,
        });
    }

    // Rule 3: close to the ceiling, split the run when a cut exists.
    if pess >= 0.8 * safe_budget {
        reasoning.push(format!(
            "critical path p99 {}ms is within 80% of safe budget {}ms, attempting hybrid cut",
            path.timing.pessimistic_ms,
            safe_budget.round() as u64
        ));
        if let Some((inline_nodes, orchestrated_nodes)) =
            hybrid_cut(graph, &path, metadata, safe_budget)
        {
            reasoning.push(format!(
                "cut found: {} inline node(s), {} orchestrated node(s)",
                inline_nodes.len(),
                orchestrated_nodes.len()
            ));
            return Ok(ExecutionPlan {
                mode: ExecutionMode::Hybrid,
                critical_path: path,
                inline_nodes: Some(inline_nodes),
                orchestrated_nodes: Some(orchestrated_nodes),
                reasoning,
            });
        }
        reasoning.push("no valid cut point on the critical path".to_string());
    }

    // Rule 4: nothing stood in the way of running inline.
    reasoning.push(format!(
        "critical path p99 {}ms fits safe budget {}ms",
        path.timing.pessimistic_ms,
        safe_budget.round() as u64
    ));
    debug!(mode = "inline", pessimistic_ms = path.timing.pessimistic_ms, "plan selected");
    Ok(ExecutionPlan {
        mode: ExecutionMode::Inline,
        critical_path: path,
        inline_nodes: None,
        orchestrated_nodes: None,
        reasoning,
    })
}

/// Search for a hybrid cut point.
///
/// The critical path is walked in order, accumulating pessimistic time;
/// nodes stay in the inline prefix while the running total fits 70% of the
/// safe budget. Off-path nodes follow their dependencies: a node joins the
/// inline side only if every predecessor already did. Both sides must be
/// non-empty for the cut to be valid.
pub(crate) fn hybrid_cut(
    graph: &FlowGraph,
    path: &CriticalPath,
    metadata: &HashMap<String, StepMetadata>,
    safe_budget: f64,
) -> Option<(Vec<String>, Vec<String>)> {
    let prefix_budget = 0.7 * safe_budget;
    let on_path: HashSet<&str> = path.node_ids.iter().map(String::as_str).collect();

    let mut inline: Vec<String> = Vec::new();
    let mut inline_set: HashSet<&str> = HashSet::new();
    let mut orchestrated: Vec<String> = Vec::new();
    let mut accumulated = 0.0;
    let mut cutting = false;

    for id in &path.node_ids {
        let timing = metadata.get(id).map(|m| m.timing).unwrap_or_default();
        let pess = timing.pessimistic_ms() as f64;
        if !cutting && accumulated + pess <= prefix_budget {
            accumulated += pess;
            inline.push(id.clone());
            inline_set.insert(id.as_str());
        } else {
            cutting = true;
            orchestrated.push(id.clone());
        }
    }

    if inline.is_empty() || orchestrated.is_empty() {
        return None;
    }

    // Off-path assignment in topological order so transitive placement
    // settles in one pass.
    let order = crate::adapters::emission_order(graph).ok()?;
    for id in &order {
        if on_path.contains(id.as_str()) {
            continue;
        }
        let node = graph.node(id)?;
        let all_inline = node
            .depends_on
            .iter()
            .all(|dep| inline_set.contains(dep.as_str()));
        if all_inline {
            inline.push(id.clone());
            inline_set.insert(id.as_str());
        } else {
            orchestrated.push(id.clone());
        }
    }

    Some((inline, orchestrated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::definition::StepTiming;
    use crate::model::graph::{FlowNode, NodeKind};

    fn p99(p99_ms: u64) -> StepMetadata {
        StepMetadata {
            timing: StepTiming {
                p50_ms: Some(p99_ms / 2),
                p99_ms: Some(p99_ms),
            },
            ..Default::default()
        }
    }

    fn chain(ids: &[&str]) -> FlowGraph {
        let mut nodes = Vec::new();
        for (i, id) in ids.iter().enumerate() {
            let mut node = FlowNode::new(*id, NodeKind::Task);
            if i > 0 {
                node = node.with_dep(ids[i - 1]);
            }
            nodes.push(node);
        }
        FlowGraph::new(nodes)
    }

    #[test]
    fn orchestrated_when_budget_is_tight() {
        let graph = chain(&["first", "second"]);
        let mut meta = HashMap::new();
        meta.insert("first".to_string(), p99(600_000));
        meta.insert("second".to_string(), p99(400_000));

        let plan = plan(&graph, &meta, &PlannerConfig::new(720_000)).unwrap();
        assert_eq!(plan.mode, ExecutionMode::Orchestrated);
        assert!(plan.reasoning.iter().any(|r| r.contains("648000")));
    }

    #[test]
    fn near_ceiling_chain_is_never_inline() {
        let graph = chain(&["a", "b", "c"]);
        let mut meta = HashMap::new();
        meta.insert("a".to_string(), p99(300_000));
        meta.insert("b".to_string(), p99(300_000));
        meta.insert("c".to_string(), p99(200_000));

        let plan = plan(&graph, &meta, &PlannerConfig::new(720_000)).unwrap();
        assert_ne!(plan.mode, ExecutionMode::Inline);
        if plan.mode == ExecutionMode::Hybrid {
            let inline = plan.inline_nodes.unwrap();
            let orchestrated = plan.orchestrated_nodes.unwrap();
            assert!(!inline.is_empty());
            assert!(!orchestrated.is_empty());
            let mut union: Vec<String> =
                inline.iter().chain(orchestrated.iter()).cloned().collect();
            union.sort();
            assert_eq!(union, vec!["a", "b", "c"]);
        }
    }

    #[test]
    fn short_pipeline_stays_inline() {
        let graph = chain(&["quick"]);
        let mut meta = HashMap::new();
        meta.insert("quick".to_string(), p99(1_000));

        let plan = plan(&graph, &meta, &PlannerConfig::new(600_000)).unwrap();
        assert_eq!(plan.mode, ExecutionMode::Inline);
    }

    #[test]
    fn orchestrated_only_placement_wins() {
        let graph = chain(&["fast"]);
        let mut meta = HashMap::new();
        meta.insert(
            "fast".to_string(),
            StepMetadata {
                placement: Placement::OrchestratedOnly,
                timing: StepTiming {
                    p50_ms: Some(10),
                    p99_ms: Some(20),
                },
            },
        );

        let plan = plan(&graph, &meta, &PlannerConfig::new(600_000)).unwrap();
        assert_eq!(plan.mode, ExecutionMode::Orchestrated);
        assert!(plan.reasoning[0].contains("orchestrated-only"));
    }

    #[test]
    fn hybrid_cut_assigns_off_path_nodes_by_dependency() {
        // a -> b -> c -> late is the critical path; "side" hangs off a.
        let graph = FlowGraph::new(vec![
            FlowNode::new("a", NodeKind::Task),
            FlowNode::new("b", NodeKind::Task).with_dep("a"),
            FlowNode::new("c", NodeKind::Task).with_dep("b"),
            FlowNode::new("side", NodeKind::Task).with_dep("a"),
            FlowNode::new("late", NodeKind::Task).with_dep("c"),
        ]);
        let mut meta = HashMap::new();
        meta.insert("a".to_string(), p99(300_000));
        meta.insert("b".to_string(), p99(300_000));
        meta.insert("c".to_string(), p99(100_000));
        meta.insert("side".to_string(), p99(1_000));
        meta.insert("late".to_string(), p99(1_000));

        let path = critical_path(&graph, &meta).unwrap();
        let (inline, orchestrated) =
            hybrid_cut(&graph, &path, &meta, 648_000.0).expect("cut exists");

        assert!(inline.contains(&"a".to_string()));
        assert!(inline.contains(&"side".to_string()));
        assert!(orchestrated.contains(&"late".to_string()));
        assert_eq!(inline.len() + orchestrated.len(), 5);
    }

    #[test]
    fn planning_is_deterministic() {
        let graph = chain(&["a", "b", "c"]);
        let mut meta = HashMap::new();
        meta.insert("a".to_string(), p99(300_000));
        meta.insert("b".to_string(), p99(300_000));
        meta.insert("c".to_string(), p99(200_000));
        let cfg = PlannerConfig::new(720_000);

        let first = plan(&graph, &meta, &cfg).unwrap();
        let second = plan(&graph, &meta, &cfg).unwrap();
        assert_eq!(first.mode, second.mode);
        assert_eq!(first.reasoning, second.reasoning);
    }

    #[test]
    fn plan_serializes_with_stable_names() {
        let graph = chain(&["a", "b"]);
        let mut meta = HashMap::new();
        meta.insert("a".to_string(), p99(500_000));
        meta.insert("b".to_string(), p99(400_000));

        let plan = plan(&graph, &meta, &PlannerConfig::new(720_000)).unwrap();
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["mode"], "orchestrated");
        assert!(json["criticalPath"]["timing"]["pessimisticMs"].is_u64());
        assert!(json["reasoning"].is_array());
    }
}
