//! State-machine JSON dialect (`StartAt` + `States`).
//!
//! Import inverts the dialect's forward pointers (`Next`, `Choices[].Next`,
//! `Default`, `Branches[].StartAt`, `Catch[].Next`) into `depends_on`
//! edges. Export recomputes `Next`/`End` from the graph; a task or pass
//! node with several successors that the state's own config cannot carry is
//! promoted into a synthetic parallel state so no edge is lost.

use crate::adapters::{emission_order, AdapterWarning, ExportOptions, ExportOutcome, ImportOutcome};
use crate::error::PipelineError;
use crate::model::graph::{FlowGraph, FlowNode, NodeKind};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

const DIALECT: &str = "state-machine";

/// Bidirectional adapter for the state-machine JSON dialect.
#[derive(Debug, Default)]
pub struct StateMachineAdapter;

impl StateMachineAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Parse a state-machine document into the neutral model.
    pub fn import(&self, blob: &str) -> Result<ImportOutcome, PipelineError> {
        let doc: Value = serde_json::from_str(blob).map_err(|e| PipelineError::InvalidDialect {
            dialect: DIALECT.to_string(),
            message: e.to_string(),
        })?;
        let doc = doc.as_object().ok_or_else(|| invalid("document is not an object"))?;

        let start_at = doc
            .get("StartAt")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing string field 'StartAt'"))?
            .to_string();
        let states = doc
            .get("States")
            .and_then(Value::as_object)
            .ok_or_else(|| invalid("missing object field 'States'"))?;

        let mut document = Map::new();
        for (key, value) in doc {
            if key != "StartAt" && key != "States" {
                document.insert(key.clone(), value.clone());
            }
        }

        let mut warnings = Vec::new();
        let mut nodes: Vec<FlowNode> = Vec::with_capacity(states.len());
        let mut kept: HashMap<String, usize> = HashMap::new();
        let mut dropped: HashSet<String> = HashSet::new();

        for (name, state) in states {
            let state = state.as_object().ok_or_else(|| PipelineError::SchemaViolation {
                element: name.clone(),
                message: "state is not an object".to_string(),
            })?;
            let state_type = state
                .get("Type")
                .and_then(Value::as_str)
                .ok_or_else(|| PipelineError::SchemaViolation {
                    element: name.clone(),
                    message: "state has no 'Type'".to_string(),
                })?;

            let kind = match state_type {
                "Task" => NodeKind::Task,
                "Pass" => NodeKind::Pass,
                "Choice" => NodeKind::Choice,
                "Parallel" => NodeKind::Parallel,
                "Map" | "Wait" | "Succeed" | "Fail" => NodeKind::Task,
                other => {
                    warnings.push(AdapterWarning::new(
                        name.clone(),
                        other,
                        "state type has no neutral mapping; state dropped",
                    ));
                    dropped.insert(name.clone());
                    continue;
                }
            };

            let step_ref = match (state_type, state.get("Resource").and_then(Value::as_str)) {
                ("Task", Some(resource)) => resource_step_ref(resource, name),
                _ => name.clone(),
            };

            // Next and End are recomputed from edges on export; everything
            // else rides in config verbatim.
            let mut config = Map::new();
            for (key, value) in state {
                if key != "Next" && key != "End" {
                    config.insert(key.clone(), value.clone());
                }
            }

            kept.insert(name.clone(), nodes.len());
            nodes.push(
                FlowNode::new(name.clone(), kind)
                    .with_step_ref(step_ref)
                    .with_config(config),
            );
        }

        // Invert every forward pointer into a dependency on the source.
        for (name, state) in states {
            if dropped.contains(name) {
                continue;
            }
            let state = state.as_object().expect("validated above");
            for target in forward_targets(state) {
                if dropped.contains(&target) {
                    warnings.push(AdapterWarning::new(
                        name.clone(),
                        "transition",
                        format!("edge to dropped state '{target}' removed"),
                    ));
                    continue;
                }
                let idx = *kept.get(&target).ok_or_else(|| PipelineError::SchemaViolation {
                    element: name.clone(),
                    message: format!("transition references unknown state '{target}'"),
                })?;
                if !nodes[idx].depends_on_id(name) {
                    nodes[idx].depends_on.push(name.clone());
                }
            }
        }

        if !kept.contains_key(&start_at) {
            return Err(PipelineError::SchemaViolation {
                element: start_at.clone(),
                message: "'StartAt' references no importable state".to_string(),
            });
        }

        // StartAt is always an entry; other entries are inferred.
        let mut entries = vec![start_at.clone()];
        for node in &nodes {
            if node.depends_on.is_empty() && node.id != start_at {
                entries.push(node.id.clone());
            }
        }

        debug!(states = nodes.len(), dropped = dropped.len(), "imported state machine");

        Ok(ImportOutcome {
            graph: FlowGraph::new(nodes).with_entries(entries),
            warnings,
            document,
        })
    }

    /// Render a neutral graph as a state-machine document.
    pub fn export(
        &self,
        graph: &FlowGraph,
        opts: &ExportOptions,
    ) -> Result<ExportOutcome, PipelineError> {
        let order = emission_order(graph)?;
        let successors = graph.successors();
        let entries = graph.effective_entries();
        let start_at = entries.first().cloned().ok_or(PipelineError::NoEntries)?;

        let mut warnings = Vec::new();
        let mut states = Map::new();

        for id in &order {
            let node = graph.node(id).expect("emission order covers graph nodes");
            let succ = successors.get(id).cloned().unwrap_or_default();
            let state = match node.kind {
                NodeKind::Task | NodeKind::Pass => {
                    export_sequential_state(node, &succ, &mut warnings)
                }
                NodeKind::Choice => {
                    let carried = config_carried_targets(&node.config);
                    for target in succ.iter().filter(|s| !carried.contains(*s)) {
                        warnings.push(AdapterWarning::new(
                            node.id.clone(),
                            "choice",
                            format!("successor '{target}' is not covered by Choices/Default"),
                        ));
                    }
                    export_config_state(node, "Choice")
                }
                NodeKind::Parallel => export_parallel_state(node, &succ),
            };
            states.insert(id.clone(), state);
        }

        let mut doc = Map::new();
        for (key, value) in &opts.document {
            doc.insert(key.clone(), value.clone());
        }
        doc.insert("StartAt".to_string(), json!(start_at));
        doc.insert("States".to_string(), Value::Object(states));

        let blob = serde_json::to_string_pretty(&Value::Object(doc))?;
        Ok(ExportOutcome { blob, warnings })
    }
}

fn invalid(message: &str) -> PipelineError {
    PipelineError::InvalidDialect {
        dialect: DIALECT.to_string(),
        message: message.to_string(),
    }
}

/// Every state name a state points forward to.
fn forward_targets(state: &Map<String, Value>) -> Vec<String> {
    let mut targets = Vec::new();
    if let Some(next) = state.get("Next").and_then(Value::as_str) {
        targets.push(next.to_string());
    }
    if let Some(choices) = state.get("Choices").and_then(Value::as_array) {
        for choice in choices {
            if let Some(next) = choice.get("Next").and_then(Value::as_str) {
                targets.push(next.to_string());
            }
        }
    }
    if let Some(default) = state.get("Default").and_then(Value::as_str) {
        targets.push(default.to_string());
    }
    if let Some(branches) = state.get("Branches").and_then(Value::as_array) {
        for branch in branches {
            if let Some(start) = branch.get("StartAt").and_then(Value::as_str) {
                targets.push(start.to_string());
            }
        }
    }
    if let Some(catchers) = state.get("Catch").and_then(Value::as_array) {
        for catcher in catchers {
            if let Some(next) = catcher.get("Next").and_then(Value::as_str) {
                targets.push(next.to_string());
            }
        }
    }
    targets
}

/// Extract a registry key from a `Resource` string.
///
/// ARN-shaped resources of the form `…:function:NAME` or `…:activity:NAME`
/// yield `NAME`; other non-ARN strings are used literally; anything else
/// falls back to the state name.
fn resource_step_ref(resource: &str, state_name: &str) -> String {
    if let Some(rest) = resource.strip_prefix("arn:") {
        let segments: Vec<&str> = rest.split(':').collect();
        for (i, segment) in segments.iter().enumerate() {
            if (*segment == "function" || *segment == "activity") && i + 1 < segments.len() {
                return segments[i + 1].to_string();
            }
        }
        state_name.to_string()
    } else {
        resource.to_string()
    }
}

/// Targets a state's own config already carries (and therefore re-emits).
fn config_carried_targets(config: &Map<String, Value>) -> BTreeSet<String> {
    let mut carried = BTreeSet::new();
    if let Some(catchers) = config.get("Catch").and_then(Value::as_array) {
        for catcher in catchers {
            if let Some(next) = catcher.get("Next").and_then(Value::as_str) {
                carried.insert(next.to_string());
            }
        }
    }
    if let Some(choices) = config.get("Choices").and_then(Value::as_array) {
        for choice in choices {
            if let Some(next) = choice.get("Next").and_then(Value::as_str) {
                carried.insert(next.to_string());
            }
        }
    }
    if let Some(default) = config.get("Default").and_then(Value::as_str) {
        carried.insert(default.to_string());
    }
    if let Some(branches) = config.get("Branches").and_then(Value::as_array) {
        for branch in branches {
            if let Some(start) = branch.get("StartAt").and_then(Value::as_str) {
                carried.insert(start.to_string());
            }
        }
    }
    carried
}

/// Export a task or pass node, promoting to a synthetic parallel state when
/// the remaining fan-out cannot be expressed with a single `Next`.
fn export_sequential_state(
    node: &FlowNode,
    successors: &[String],
    warnings: &mut Vec<AdapterWarning>,
) -> Value {
    let carried = config_carried_targets(&node.config);
    let mut extra: Vec<&String> = successors.iter().filter(|s| !carried.contains(*s)).collect();
    extra.sort();

    if extra.len() > 1 {
        // Promotion changes the host kind, so the original config is not
        // re-emitted; every edge the config carried is dropped with it
        // and must be accounted for.
        let branches: Vec<Value> = extra
            .iter()
            .map(|succ| json!({ "StartAt": succ, "States": {} }))
            .collect();
        warnings.push(AdapterWarning::new(
            node.id.clone(),
            "fan-out",
            "multiple successors promoted to a synthetic parallel state",
        ));
        for target in &carried {
            warnings.push(AdapterWarning::new(
                node.id.clone(),
                "fan-out",
                format!("edge to '{target}' carried by the state's config is dropped by promotion"),
            ));
        }
        return json!({ "Branches": branches, "Type": "Parallel" });
    }

    let mut state = base_state(node, default_type(node.kind));
    match extra.first() {
        Some(next) => {
            state.insert("Next".to_string(), json!(next));
        }
        None => {
            state.insert("End".to_string(), json!(true));
        }
    }
    Value::Object(state)
}

/// Export a choice node: its `Choices`/`Default` come from config verbatim.
fn export_config_state(node: &FlowNode, type_name: &str) -> Value {
    Value::Object(base_state(node, type_name))
}

/// Export a parallel node; branches are synthesized from successors when
/// the config does not already carry them.
fn export_parallel_state(node: &FlowNode, successors: &[String]) -> Value {
    let mut state = base_state(node, "Parallel");
    if !state.contains_key("Branches") {
        let mut succ: Vec<&String> = successors.iter().collect();
        succ.sort();
        let branches: Vec<Value> = succ
            .iter()
            .map(|s| json!({ "StartAt": s, "States": {} }))
            .collect();
        state.insert("Branches".to_string(), json!(branches));
    }
    if !state.contains_key("End") && !state.contains_key("Next") {
        state.insert("End".to_string(), json!(true));
    }
    Value::Object(state)
}

/// Start from the node's preserved config and ensure `Type` and, for tasks
/// whose step reference is not the state name, `Resource` are present.
fn base_state(node: &FlowNode, type_name: &str) -> Map<String, Value> {
    let mut state = node.config.clone();
    state
        .entry("Type".to_string())
        .or_insert_with(|| json!(type_name));
    if node.kind == NodeKind::Task && !state.contains_key("Resource") {
        if let Some(step_ref) = &node.step_ref {
            if step_ref != &node.id {
                state.insert("Resource".to_string(), json!(step_ref));
            }
        }
    }
    state
}

fn default_type(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Task => "Task",
        NodeKind::Pass => "Pass",
        NodeKind::Choice => "Choice",
        NodeKind::Parallel => "Parallel",
    }
}
