//! Scenario (API-workflow) JSON dialect.
//!
//! Scenarios declare their steps with explicit `runAfter` dependencies, so
//! import is a direct translation; the interesting part is the typed step
//! kinds and the loop/sleep downgrade.

use crate::adapters::{emission_order, AdapterWarning, ExportOptions, ExportOutcome, ImportOutcome};
use crate::error::PipelineError;
use crate::model::graph::{FlowGraph, FlowNode, NodeKind};
use serde_json::{json, Map, Value};
use tracing::debug;

const DIALECT: &str = "scenario";

/// Bidirectional adapter for the scenario JSON dialect.
#[derive(Debug, Default)]
pub struct ScenarioAdapter;

impl ScenarioAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Import one named scenario from a scenario document.
    pub fn import(&self, blob: &str, scenario: &str) -> Result<ImportOutcome, PipelineError> {
        let doc: Value = serde_json::from_str(blob).map_err(|e| PipelineError::InvalidDialect {
            dialect: DIALECT.to_string(),
            message: e.to_string(),
        })?;
        let doc = doc.as_object().ok_or_else(|| invalid("document is not an object"))?;

        let scenarios = doc
            .get("scenarios")
            .and_then(Value::as_object)
            .ok_or_else(|| invalid("missing object field 'scenarios'"))?;
        let selected = scenarios
            .get(scenario)
            .ok_or_else(|| PipelineError::ScenarioNotFound(scenario.to_string()))?;
        let steps = selected
            .get("steps")
            .and_then(Value::as_array)
            .ok_or_else(|| PipelineError::SchemaViolation {
                element: scenario.to_string(),
                message: "scenario has no 'steps' array".to_string(),
            })?;

        let mut document = Map::new();
        for (key, value) in doc {
            if key != "scenarios" {
                document.insert(key.clone(), value.clone());
            }
        }
        if let Some(description) = selected.get("description") {
            document.insert("description".to_string(), description.clone());
        }

        let mut warnings = Vec::new();
        let mut nodes = Vec::with_capacity(steps.len());

        for step in steps {
            let step = step.as_object().ok_or_else(|| invalid("step is not an object"))?;
            let id = step
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("step has no string 'id'"))?
                .to_string();

            let step_type = step.get("type").and_then(Value::as_str).unwrap_or("operation");
            let kind = match step_type {
                "operation" => NodeKind::Task,
                "pass" => NodeKind::Pass,
                "switch" => NodeKind::Choice,
                "parallel" => NodeKind::Parallel,
                "loop" | "sleep" => {
                    warnings.push(AdapterWarning::new(
                        id.clone(),
                        step_type,
                        "downgraded to a plain task",
                    ));
                    NodeKind::Task
                }
                other => {
                    warnings.push(AdapterWarning::new(
                        id.clone(),
                        other,
                        "unrecognized step type treated as a plain task",
                    ));
                    NodeKind::Task
                }
            };

            let step_ref = step
                .get("operationId")
                .and_then(Value::as_str)
                .unwrap_or(&id)
                .to_string();

            let depends_on = step
                .get("runAfter")
                .and_then(Value::as_array)
                .map(|deps| {
                    deps.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            // Everything but the structural fields rides in config.
            let mut config = Map::new();
            for (key, value) in step {
                if key != "id" && key != "runAfter" {
                    config.insert(key.clone(), value.clone());
                }
            }

            nodes.push(
                FlowNode::new(id, kind)
                    .with_deps(depends_on)
                    .with_step_ref(step_ref)
                    .with_config(config),
            );
        }

        debug!(scenario, steps = nodes.len(), "imported scenario");

        Ok(ImportOutcome {
            graph: FlowGraph::new(nodes),
            warnings,
            document,
        })
    }

    /// Render a neutral graph as a scenario document.
    pub fn export(
        &self,
        graph: &FlowGraph,
        opts: &ExportOptions,
    ) -> Result<ExportOutcome, PipelineError> {
        let order = emission_order(graph)?;
        let scenario_name = opts.scenario_name.as_deref().unwrap_or("main");

        let mut steps = Vec::with_capacity(order.len());
        for id in &order {
            let node = graph.node(id).expect("emission order covers graph nodes");

            let mut step = node.config.clone();
            step.insert("id".to_string(), json!(node.id));
            step.entry("type".to_string())
                .or_insert_with(|| json!(default_type(node.kind)));
            if !node.depends_on.is_empty() {
                let mut deps = node.depends_on.clone();
                deps.sort();
                step.insert("runAfter".to_string(), json!(deps));
            }
            if let Some(step_ref) = &node.step_ref {
                if node.kind == NodeKind::Task && step_ref != &node.id {
                    step.entry("operationId".to_string())
                        .or_insert_with(|| json!(step_ref));
                }
            }
            steps.push(Value::Object(step));
        }

        let mut scenario = Map::new();
        if let Some(description) = opts.document.get("description") {
            scenario.insert("description".to_string(), description.clone());
        }
        scenario.insert("steps".to_string(), json!(steps));

        let mut doc = Map::new();
        for (key, value) in &opts.document {
            if key != "description" {
                doc.insert(key.clone(), value.clone());
            }
        }
        doc.insert(
            "scenarios".to_string(),
            json!({ scenario_name: Value::Object(scenario) }),
        );

        let blob = serde_json::to_string_pretty(&Value::Object(doc))?;
        Ok(ExportOutcome {
            blob,
            warnings: Vec::new(),
        })
    }
}

fn invalid(message: &str) -> PipelineError {
    PipelineError::InvalidDialect {
        dialect: DIALECT.to_string(),
        message: message.to_string(),
    }
}

fn default_type(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Task => "operation",
        NodeKind::Pass => "pass",
        NodeKind::Choice => "switch",
        NodeKind::Parallel => "parallel",
    }
}
