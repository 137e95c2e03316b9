//! Conversion between the neutral model and runnable definitions.

use crate::error::PipelineError;
use crate::exec::definition::{PipelineDefinition, StepEntry, StepMetadata};
use crate::model::graph::{FlowGraph, FlowNode, NodeKind};
use crate::model::registry::StepRegistry;
use std::collections::HashMap;

/// Materialize a neutral graph into a runnable definition.
///
/// Every node must carry a `step_ref` registered in `registry`; dependency
/// ids are translated into the tokens those nodes resolve to. Planner
/// metadata is read from the node's `config.metadata`, falling back to the
/// registry's registration-time default.
pub fn to_definition(
    graph: &FlowGraph,
    registry: &StepRegistry,
) -> Result<PipelineDefinition, PipelineError> {
    let mut tokens_by_id = HashMap::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        let step_ref = node.step_ref.as_deref().ok_or_else(|| {
            PipelineError::SchemaViolation {
                element: node.id.clone(),
                message: "node carries no step reference".to_string(),
            }
        })?;
        let token = registry.resolve(step_ref)?;
        tokens_by_id.insert(node.id.as_str(), (token, step_ref));
    }

    let mut def = PipelineDefinition::new();
    for node in &graph.nodes {
        let (token, step_ref) = tokens_by_id[node.id.as_str()];
        let mut depends_on = Vec::with_capacity(node.depends_on.len());
        for dep in &node.depends_on {
            let (dep_token, _) = tokens_by_id.get(dep.as_str()).ok_or_else(|| {
                PipelineError::UnknownDependency {
                    step: node.id.clone(),
                }
            })?;
            depends_on.push(*dep_token);
        }

        let metadata = node_metadata(node).or_else(|| registry.metadata(step_ref));

        def.push_entry(StepEntry {
            token,
            step: registry.construct(step_ref)?,
            depends_on,
            metadata,
        });
    }

    Ok(def)
}

/// Lift a definition back into the neutral model.
///
/// Every token must map back to a registry name; node ids are those names,
/// and `entry_ids` is populated with the dependency-free steps.
pub fn to_flow_graph(
    def: &PipelineDefinition,
    registry: &StepRegistry,
) -> Result<FlowGraph, PipelineError> {
    let mut nodes = Vec::with_capacity(def.len());
    let mut entries = Vec::new();

    for entry in def.entries() {
        let name = registry.name_of(entry.token)?;
        let mut node = FlowNode::new(name.clone(), NodeKind::Task).with_step_ref(name.clone());

        for dep in &entry.depends_on {
            node.depends_on.push(registry.name_of(*dep)?);
        }

        if let Some(meta) = entry.metadata {
            node.config
                .insert("metadata".to_string(), serde_json::to_value(meta)?);
        }

        if entry.depends_on.is_empty() {
            entries.push(name);
        }
        nodes.push(node);
    }

    Ok(FlowGraph::new(nodes).with_entries(entries))
}

fn node_metadata(node: &FlowNode) -> Option<StepMetadata> {
    node.config
        .get("metadata")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::leveler::build_levels;
    use crate::exec::step::{FnStep, PipelineContext, Step};
    use std::sync::Arc;

    fn registry_with(names: &[&str]) -> StepRegistry {
        let registry = StepRegistry::new();
        for name in names {
            registry
                .register(name, || {
                    Arc::new(FnStep(|_ctx: Arc<PipelineContext>| async { Ok(()) }))
                        as Arc<dyn Step>
                })
                .unwrap();
        }
        registry
    }

    #[test]
    fn chain_materializes_in_order() {
        let registry = registry_with(&["first", "second"]);
        let graph = FlowGraph::new(vec![
            FlowNode::new("a", NodeKind::Task).with_step_ref("first"),
            FlowNode::new("b", NodeKind::Task)
                .with_step_ref("second")
                .with_dep("a"),
        ]);

        let def = to_definition(&graph, &registry).unwrap();
        let levels = build_levels(&def).unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0][0], registry.resolve("first").unwrap());
        assert_eq!(levels[1][0], registry.resolve("second").unwrap());
    }

    #[test]
    fn missing_step_ref_is_a_schema_violation() {
        let registry = registry_with(&[]);
        let graph = FlowGraph::new(vec![FlowNode::new("a", NodeKind::Task)]);
        let err = to_definition(&graph, &registry).unwrap_err();
        assert_eq!(err.kind(), "schema-violation");
    }

    #[test]
    fn unknown_step_ref_fails() {
        let registry = registry_with(&[]);
        let graph =
            FlowGraph::new(vec![FlowNode::new("a", NodeKind::Task).with_step_ref("ghost")]);
        let err = to_definition(&graph, &registry).unwrap_err();
        assert_eq!(err.kind(), "unknown-step");
    }

    #[test]
    fn unknown_dependency_id_fails() {
        let registry = registry_with(&["only"]);
        let graph = FlowGraph::new(vec![FlowNode::new("a", NodeKind::Task)
            .with_step_ref("only")
            .with_dep("missing")]);
        let err = to_definition(&graph, &registry).unwrap_err();
        assert_eq!(err.kind(), "unknown-dependency");
    }

    #[test]
    fn round_trip_is_identity_for_task_graphs() {
        let registry = registry_with(&["extract", "transform", "load"]);
        let graph = FlowGraph::new(vec![
            FlowNode::new("extract", NodeKind::Task).with_step_ref("extract"),
            FlowNode::new("transform", NodeKind::Task)
                .with_step_ref("transform")
                .with_dep("extract"),
            FlowNode::new("load", NodeKind::Task)
                .with_step_ref("load")
                .with_dep("transform"),
        ]);

        let def = to_definition(&graph, &registry).unwrap();
        let back = to_flow_graph(&def, &registry).unwrap();

        assert_eq!(back.nodes.len(), 3);
        for (orig, round) in graph.nodes.iter().zip(back.nodes.iter()) {
            assert_eq!(orig.id, round.id);
            assert_eq!(orig.depends_on, round.depends_on);
            assert_eq!(orig.step_ref, round.step_ref);
        }
        assert_eq!(back.effective_entries(), vec!["extract"]);
    }

    #[test]
    fn metadata_rides_the_round_trip() {
        let registry = registry_with(&["slow"]);
        let mut node = FlowNode::new("slow", NodeKind::Task).with_step_ref("slow");
        node.config.insert(
            "metadata".to_string(),
            serde_json::json!({ "timing": { "p50_ms": 5000 } }),
        );
        let graph = FlowGraph::new(vec![node]);

        let def = to_definition(&graph, &registry).unwrap();
        let token = registry.resolve("slow").unwrap();
        assert_eq!(def.metadata_for(token).timing.optimistic_ms(), 5000);

        let back = to_flow_graph(&def, &registry).unwrap();
        let meta = back.metadata_by_node();
        assert_eq!(meta["slow"].timing.optimistic_ms(), 5000);
    }
}
