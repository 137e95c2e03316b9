//! Planner behavior over the public API.

use std::collections::HashMap;
use virta::{
    critical_path, plan, ExecutionMode, FlowGraph, FlowNode, NodeKind, PlannerConfig,
    StepMetadata, StepTiming,
};

fn timing(p99_ms: u64) -> StepMetadata {
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
        let mut node = FlowNode::new(*id, NodeKind::Task).with_step_ref(*id);
        if i > 0 {
            node = node.with_dep(ids[i - 1]);
        }
        nodes.push(node);
    }
    FlowGraph::new(nodes)
}

#[test]
fn two_step_chain_over_budget_goes_orchestrated() {
    let graph = chain(&["first", "second"]);
    let mut meta = HashMap::new();
    meta.insert("first".to_string(), timing(600_000));
    meta.insert("second".to_string(), timing(400_000));

    let decision = plan(&graph, &meta, &PlannerConfig::new(720_000)).unwrap();
    assert_eq!(decision.mode, ExecutionMode::Orchestrated);
    assert!(
        decision.reasoning.iter().any(|r| r.contains("648000")),
        "reasoning should cite the safe budget: {:?}",
        decision.reasoning
    );
}

#[test]
fn three_step_chain_near_budget_is_hybrid_or_orchestrated() {
    let graph = chain(&["a", "b", "c"]);
    let mut meta = HashMap::new();
    meta.insert("a".to_string(), timing(300_000));
    meta.insert("b".to_string(), timing(300_000));
    meta.insert("c".to_string(), timing(200_000));

    let decision = plan(&graph, &meta, &PlannerConfig::new(720_000)).unwrap();
    match decision.mode {
        ExecutionMode::Hybrid => {
            let inline = decision.inline_nodes.expect("hybrid plan names inline nodes");
            let orchestrated = decision
                .orchestrated_nodes
                .expect("hybrid plan names orchestrated nodes");
            assert!(!inline.is_empty() && !orchestrated.is_empty());

            let mut union: Vec<String> =
                inline.iter().chain(orchestrated.iter()).cloned().collect();
            union.sort();
            assert_eq!(union, vec!["a", "b", "c"]);
        }
        ExecutionMode::Orchestrated => {}
        other => panic!("near-budget chain must not run {other:?}"),
    }
}

#[test]
fn critical_path_reads_metadata_from_node_config() {
    let mut slow = FlowNode::new("slow", NodeKind::Task).with_step_ref("slow");
    slow.config.insert(
        "metadata".to_string(),
        serde_json::json!({ "timing": { "p50_ms": 30000, "p99_ms": 90000 } }),
    );
    let graph = FlowGraph::new(vec![
        slow,
        FlowNode::new("after", NodeKind::Task)
            .with_step_ref("after")
            .with_dep("slow"),
    ]);

    let path = critical_path(&graph, &graph.metadata_by_node()).unwrap();
    assert_eq!(path.node_ids, vec!["slow", "after"]);
    // "after" falls back to the 1s/2s defaults.
    assert_eq!(path.timing.optimistic_ms, 31_000);
    assert_eq!(path.timing.pessimistic_ms, 92_000);
}

#[test]
fn fan_out_critical_path_takes_one_branch() {
    let graph = FlowGraph::new(vec![
        FlowNode::new("seed", NodeKind::Task),
        FlowNode::new("cheap", NodeKind::Task).with_dep("seed"),
        FlowNode::new("costly", NodeKind::Task).with_dep("seed"),
    ]);
    let mut meta = HashMap::new();
    meta.insert("seed".to_string(), timing(10_000));
    meta.insert("cheap".to_string(), timing(1_000));
    meta.insert("costly".to_string(), timing(50_000));

    let path = critical_path(&graph, &meta).unwrap();
    assert_eq!(path.node_ids, vec!["seed", "costly"]);
    assert_eq!(path.timing.pessimistic_ms, 60_000);
}

#[test]
fn plan_output_shape_is_stable() {
    let graph = chain(&["a", "b"]);
    let mut meta = HashMap::new();
    meta.insert("a".to_string(), timing(500_000));
    meta.insert("b".to_string(), timing(400_000));

    let decision = plan(&graph, &meta, &PlannerConfig::new(720_000)).unwrap();
    let json = serde_json::to_value(&decision).unwrap();

    assert_eq!(json["mode"], "orchestrated");
    assert_eq!(json["criticalPath"]["nodeIds"][0], "a");
    assert!(json["criticalPath"]["timing"]["optimisticMs"].is_u64());
    assert!(json["criticalPath"]["timing"]["pessimisticMs"].is_u64());
    assert!(json["reasoning"].is_array());
    assert!(json.get("inlineNodes").is_none());
}

#[test]
fn same_inputs_same_plan() {
    let graph = chain(&["x", "y", "z"]);
    let mut meta = HashMap::new();
    meta.insert("x".to_string(), timing(250_000));
    meta.insert("y".to_string(), timing(250_000));
    meta.insert("z".to_string(), timing(150_000));
    let cfg = PlannerConfig::new(720_000);

    let first = plan(&graph, &meta, &cfg).unwrap();
    let second = plan(&graph, &meta, &cfg).unwrap();

    assert_eq!(first.mode, second.mode);
    assert_eq!(first.reasoning, second.reasoning);
    assert_eq!(first.inline_nodes, second.inline_nodes);
    assert_eq!(first.orchestrated_nodes, second.orchestrated_nodes);
}
