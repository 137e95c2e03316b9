//! Unified runner with a budget-driven fallback chain.
//!
//! The chain tries inline, then hybrid, then orchestrated. Only a
//! budget-exhausted result advances the chain; every other failure is
//! final. Hybrid runs the inline prefix locally and hands the prefix's
//! accumulated target to the orchestrated suffix as its source.

use crate::error::PipelineError;
use crate::exec::definition::{PipelineDefinition, StepMetadata};
use crate::exec::runner::{PipelineReport, PipelineRunner, RunStatus};
use crate::exec::step::PipelineContext;
use crate::model::convert::to_definition;
use crate::model::graph::FlowGraph;
use crate::model::registry::StepRegistry;
use crate::planner::mode::{hybrid_cut, plan, ExecutionMode, ExecutionPlan, PlannerConfig};
use crate::planner::monitor::{BudgetHook, BudgetMonitor};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Executes a definition on the orchestrated service.
///
/// The real service lives outside the core; this seam is all the core
/// knows about it.
#[async_trait]
pub trait OrchestratedExecutor: Send + Sync {
    async fn run(&self, def: &PipelineDefinition, ctx: Arc<PipelineContext>) -> PipelineReport;
}

/// Process-local stand-in for the orchestrated service, used by tests and
/// single-node deployments. Orchestrated execution carries no budget hook:
/// the service owns its own deadlines.
pub struct LocalOrchestrator;

#[async_trait]
impl OrchestratedExecutor for LocalOrchestrator {
    async fn run(&self, def: &PipelineDefinition, ctx: Arc<PipelineContext>) -> PipelineReport {
        PipelineRunner::new().run(def, ctx).await
    }
}

/// Configuration for one unified run.
#[derive(Clone, Debug)]
pub struct FallbackConfig {
    pub budget_ms: u64,
    /// `Auto` opts into the fallback chain; explicit modes bypass it.
    pub mode: ExecutionMode,
    pub safety_margin: f64,
}

impl FallbackConfig {
    pub fn auto(budget_ms: u64) -> Self {
        Self {
            budget_ms,
            mode: ExecutionMode::Auto,
            safety_margin: 0.1,
        }
    }

    pub fn fixed(budget_ms: u64, mode: ExecutionMode) -> Self {
        Self {
            budget_ms,
            mode,
            safety_margin: 0.1,
        }
    }
}

/// What the unified runner did and how it ended.
#[derive(Debug)]
pub struct FallbackOutcome {
    /// Mode that produced the final report.
    pub mode: ExecutionMode,
    /// Every mode that was attempted, in order.
    pub attempted: Vec<ExecutionMode>,
    pub plan: ExecutionPlan,
    pub report: PipelineReport,
}

/// Plans and executes a neutral graph under a wall-clock budget.
pub struct FallbackRunner {
    registry: StepRegistry,
    orchestrator: Arc<dyn OrchestratedExecutor>,
}

impl FallbackRunner {
    pub fn new(registry: StepRegistry) -> Self {
        Self {
            registry,
            orchestrator: Arc::new(LocalOrchestrator),
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: Arc<dyn OrchestratedExecutor>) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    /// Run the graph. With `ExecutionMode::Auto` the planner picks the
    /// starting mode and budget-exhausted results walk the chain forward;
    /// an explicit mode runs exactly once.
    pub async fn run(
        &self,
        graph: &FlowGraph,
        source: Value,
        cfg: &FallbackConfig,
    ) -> Result<FallbackOutcome, PipelineError> {
        let metadata = self.planner_metadata(graph);
        let planner_cfg = PlannerConfig {
            budget_ms: cfg.budget_ms,
            default_mode: match cfg.mode {
                ExecutionMode::Auto => None,
                explicit => Some(explicit),
            },
            safety_margin: cfg.safety_margin,
        };
        let plan = plan(graph, &metadata, &planner_cfg)?;

        if cfg.mode != ExecutionMode::Auto {
            let report = self
                .run_mode(cfg.mode, graph, &plan, &metadata, source, cfg)
                .await?;
            return Ok(FallbackOutcome {
                mode: cfg.mode,
                attempted: vec![cfg.mode],
                plan,
                report,
            });
        }

        const CHAIN: [ExecutionMode; 3] = [
            ExecutionMode::Inline,
            ExecutionMode::Hybrid,
            ExecutionMode::Orchestrated,
        ];
        let start = CHAIN
            .iter()
            .position(|m| *m == plan.mode)
            .unwrap_or(CHAIN.len() - 1);

        let mut attempted = Vec::new();
        for (pos, mode) in CHAIN.iter().enumerate().skip(start) {
            let mode = *mode;

            // A hybrid attempt needs a cut; without one the chain moves
            // straight to orchestrated.
            if mode == ExecutionMode::Hybrid
                && self.cut_for(graph, &plan, &metadata, cfg).is_none()
            {
                info!("no hybrid cut available, skipping to orchestrated");
                continue;
            }

            attempted.push(mode);
            let report = self
                .run_mode(mode, graph, &plan, &metadata, source.clone(), cfg)
                .await?;

            let last = pos == CHAIN.len() - 1;
            if report.budget_exhausted() && !last {
                warn!(?mode, "budget exhausted, falling back to next mode");
                continue;
            }

            return Ok(FallbackOutcome {
                mode,
                attempted,
                plan,
                report,
            });
        }

        // The loop always returns on the orchestrated attempt.
        unreachable!("fallback chain ended without a terminal attempt")
    }

    async fn run_mode(
        &self,
        mode: ExecutionMode,
        graph: &FlowGraph,
        plan: &ExecutionPlan,
        metadata: &HashMap<String, StepMetadata>,
        source: Value,
        cfg: &FallbackConfig,
    ) -> Result<PipelineReport, PipelineError> {
        match mode {
            ExecutionMode::Inline => self.run_inline(graph, source, cfg.budget_ms).await,
            ExecutionMode::Orchestrated => self.run_orchestrated(graph, source).await,
            ExecutionMode::Hybrid => {
                let cut = self
                    .cut_for(graph, plan, metadata, cfg)
                    .ok_or_else(|| {
                        PipelineError::NoCutFound(
                            "hybrid execution requested but no cut exists".to_string(),
                        )
                    })?;
                self.run_hybrid(graph, cut, source, cfg.budget_ms).await
            }
            ExecutionMode::Auto => unreachable!("auto is resolved before dispatch"),
        }
    }

    /// The plan's cut when it has one, otherwise a fresh search.
    fn cut_for(
        &self,
        graph: &FlowGraph,
        plan: &ExecutionPlan,
        metadata: &HashMap<String, StepMetadata>,
        cfg: &FallbackConfig,
    ) -> Option<(Vec<String>, Vec<String>)> {
        match (&plan.inline_nodes, &plan.orchestrated_nodes) {
            (Some(inline), Some(orchestrated)) => {
                Some((inline.clone(), orchestrated.clone()))
            }
            _ => {
                let safe_budget = cfg.budget_ms as f64 * (1.0 - cfg.safety_margin);
                hybrid_cut(graph, &plan.critical_path, metadata, safe_budget)
            }
        }
    }

    async fn run_inline(
        &self,
        graph: &FlowGraph,
        source: Value,
        budget_ms: u64,
    ) -> Result<PipelineReport, PipelineError> {
        let def = to_definition(graph, &self.registry)?;
        let monitor = Arc::new(BudgetMonitor::new(budget_ms));
        let runner = PipelineRunner::new().with_hook(Arc::new(BudgetHook::new(monitor)));
        let ctx = PipelineContext::new(source);
        Ok(runner.run(&def, ctx).await)
    }

    async fn run_orchestrated(
        &self,
        graph: &FlowGraph,
        source: Value,
    ) -> Result<PipelineReport, PipelineError> {
        let def = to_definition(graph, &self.registry)?;
        let ctx = PipelineContext::new(source);
        Ok(self.orchestrator.run(&def, ctx).await)
    }

    async fn run_hybrid(
        &self,
        graph: &FlowGraph,
        (inline_ids, orchestrated_ids): (Vec<String>, Vec<String>),
        source: Value,
        budget_ms: u64,
    ) -> Result<PipelineReport, PipelineError> {
        let inline_graph = graph_subset(graph, &inline_ids);
        let suffix_graph = graph_subset(graph, &orchestrated_ids);

        let prefix = self.run_inline(&inline_graph, source, budget_ms).await?;
        if prefix.status != RunStatus::Success {
            // Budget exhaustion here routes the chain onward; any other
            // failure is the run's final answer.
            return Ok(prefix);
        }

        // The prefix's accumulated target seeds the suffix's source.
        let suffix_source = prefix.ctx.target_snapshot();
        let suffix_def = to_definition(&suffix_graph, &self.registry)?;
        let suffix_ctx = PipelineContext::new(suffix_source);
        let suffix = self.orchestrator.run(&suffix_def, suffix_ctx).await;

        let mut executed = prefix.executed;
        executed.extend(suffix.executed.iter().copied());
        let mut completed_levels = prefix.completed_levels;
        completed_levels.extend(suffix.completed_levels.iter().cloned());
        let mut errors = prefix.errors;
        errors.extend(suffix.errors);

        Ok(PipelineReport {
            status: suffix.status,
            ctx: suffix.ctx,
            errors,
            executed,
            completed_levels,
        })
    }

    /// Planner metadata per node: the node's own `config.metadata` first,
    /// then the registry's registration-time default.
    fn planner_metadata(&self, graph: &FlowGraph) -> HashMap<String, StepMetadata> {
        let mut out = graph.metadata_by_node();
        for node in &graph.nodes {
            if out.contains_key(&node.id) {
                continue;
            }
            if let Some(step_ref) = &node.step_ref {
                if let Some(meta) = self.registry.metadata(step_ref) {
                    out.insert(node.id.clone(), meta);
                }
            }
        }
        out
    }
}

/// Restrict a graph to the given ids, dropping edges that leave the set
/// and recomputing entries.
fn graph_subset(graph: &FlowGraph, keep_ids: &[String]) -> FlowGraph {
    let keep: HashSet<&str> = keep_ids.iter().map(String::as_str).collect();
    let nodes = graph
        .nodes
        .iter()
        .filter(|n| keep.contains(n.id.as_str()))
        .map(|n| {
            let mut node = n.clone();
            node.depends_on.retain(|d| keep.contains(d.as_str()));
            node
        })
        .collect();
    FlowGraph::new(nodes)
}
