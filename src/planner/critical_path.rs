//! Critical-path analysis under optimistic and pessimistic timings.

use crate::adapters::emission_order;
use crate::error::PipelineError;
use crate::exec::definition::StepMetadata;
use crate::model::graph::FlowGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Optimistic/pessimistic duration pair for a path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathTiming {
    pub optimistic_ms: u64,
    pub pessimistic_ms: u64,
}

/// The longest root-to-sink path through a graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalPath {
    pub node_ids: Vec<String>,
    pub timing: PathTiming,
}

struct NodeDistance {
    optimistic: u64,
    pessimistic: u64,
    /// Predecessor that yielded the chosen pessimistic distance.
    via: Option<String>,
}

/// Compute the path from an entry to a sink maximizing total pessimistic
/// time; ties break on larger optimistic time, then smallest id.
///
/// Timings come from `metadata` keyed by node id, with the documented
/// defaults (p50 of one second, p99 twice the p50) for absent entries.
pub fn critical_path(
    graph: &FlowGraph,
    metadata: &HashMap<String, StepMetadata>,
) -> Result<CriticalPath, PipelineError> {
    if graph.is_empty() || graph.effective_entries().is_empty() {
        return Err(PipelineError::NoEntries);
    }

    let order = emission_order(graph)?;
    let mut distances: HashMap<String, NodeDistance> = HashMap::with_capacity(order.len());

    for id in &order {
        let node = graph.node(id).expect("order covers graph nodes");
        let timing = metadata.get(id).map(|m| m.timing).unwrap_or_default();
        let (own_opt, own_pess) = (timing.optimistic_ms(), timing.pessimistic_ms());

        let mut best: Option<(String, u64, u64)> = None;
        for dep in &node.depends_on {
            let Some(dist) = distances.get(dep) else {
                continue;
            };
            let candidate = (dep.clone(), dist.optimistic, dist.pessimistic);
            best = Some(match best {
                None => candidate,
                Some(current) => pick_longer(current, candidate),
            });
        }

        let (via, base_opt, base_pess) = match best {
            Some((dep, opt, pess)) => (Some(dep), opt, pess),
            None => (None, 0, 0),
        };
        distances.insert(
            id.clone(),
            NodeDistance {
                optimistic: base_opt + own_opt,
                pessimistic: base_pess + own_pess,
                via,
            },
        );
    }

    // The terminal node is the sink with the longest pessimistic distance.
    let mut terminal: Option<(String, u64, u64)> = None;
    for sink in graph.sink_ids() {
        let dist = &distances[&sink];
        let candidate = (sink, dist.optimistic, dist.pessimistic);
        terminal = Some(match terminal {
            None => candidate,
            Some(current) => pick_longer(current, candidate),
        });
    }
    let (terminal_id, optimistic, pessimistic) = terminal.ok_or(PipelineError::NoEntries)?;

    let mut node_ids = vec![terminal_id.clone()];
    let mut cursor = terminal_id;
    while let Some(via) = distances.get(&cursor).and_then(|d| d.via.clone()) {
        node_ids.push(via.clone());
        cursor = via;
    }
    node_ids.reverse();

    Ok(CriticalPath {
        node_ids,
        timing: PathTiming {
            optimistic_ms: optimistic,
            pessimistic_ms: pessimistic,
        },
    })
}

/// Longest-distance comparison: larger pessimistic wins, then larger
/// optimistic, then the lexicographically smaller id.
fn pick_longer(
    current: (String, u64, u64),
    candidate: (String, u64, u64),
) -> (String, u64, u64) {
    if candidate.2 != current.2 {
        return if candidate.2 > current.2 { candidate } else { current };
    }
    if candidate.1 != current.1 {
        return if candidate.1 > current.1 { candidate } else { current };
    }
    if candidate.0 < current.0 {
        candidate
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::definition::{StepMetadata, StepTiming};
    use crate::model::graph::{FlowNode, NodeKind};

    fn timed(p50: u64, p99: u64) -> StepMetadata {
        StepMetadata {
            timing: StepTiming {
                p50_ms: Some(p50),
                p99_ms: Some(p99),
            },
            ..Default::default()
        }
    }

    #[test]
    fn chain_sums_both_timings() {
        let graph = FlowGraph::new(vec![
            FlowNode::new("a", NodeKind::Task),
            FlowNode::new("b", NodeKind::Task).with_dep("a"),
        ]);
        let mut meta = HashMap::new();
        meta.insert("a".to_string(), timed(100, 400));
        meta.insert("b".to_string(), timed(200, 600));

        let path = critical_path(&graph, &meta).unwrap();
        assert_eq!(path.node_ids, vec!["a", "b"]);
        assert_eq!(path.timing.optimistic_ms, 300);
        assert_eq!(path.timing.pessimistic_ms, 1000);
    }

    #[test]
    fn diamond_follows_the_slower_branch() {
        let graph = FlowGraph::new(vec![
            FlowNode::new("root", NodeKind::Task),
            FlowNode::new("fast", NodeKind::Task).with_dep("root"),
            FlowNode::new("slow", NodeKind::Task).with_dep("root"),
            FlowNode::new("join", NodeKind::Task)
                .with_dep("fast")
                .with_dep("slow"),
        ]);
        let mut meta = HashMap::new();
        meta.insert("root".to_string(), timed(10, 20));
        meta.insert("fast".to_string(), timed(10, 30));
        meta.insert("slow".to_string(), timed(10, 500));
        meta.insert("join".to_string(), timed(10, 20));

        let path = critical_path(&graph, &meta).unwrap();
        assert_eq!(path.node_ids, vec!["root", "slow", "join"]);
        assert_eq!(path.timing.pessimistic_ms, 540);
    }

    #[test]
    fn pessimistic_ties_break_on_optimistic_then_id() {
        let graph = FlowGraph::new(vec![
            FlowNode::new("root", NodeKind::Task),
            FlowNode::new("beta", NodeKind::Task).with_dep("root"),
            FlowNode::new("alpha", NodeKind::Task).with_dep("root"),
        ]);
        let mut meta = HashMap::new();
        meta.insert("root".to_string(), timed(10, 100));
        meta.insert("beta".to_string(), timed(50, 100));
        meta.insert("alpha".to_string(), timed(50, 100));

        let path = critical_path(&graph, &meta).unwrap();
        assert_eq!(path.node_ids, vec!["root", "alpha"]);
    }

    #[test]
    fn default_timings_apply_when_metadata_is_absent() {
        let graph = FlowGraph::new(vec![
            FlowNode::new("a", NodeKind::Task),
            FlowNode::new("b", NodeKind::Task).with_dep("a"),
        ]);

        let path = critical_path(&graph, &HashMap::new()).unwrap();
        assert_eq!(path.timing.optimistic_ms, 2000);
        assert_eq!(path.timing.pessimistic_ms, 4000);
    }

    #[test]
    fn empty_graph_has_no_entries() {
        let err = critical_path(&FlowGraph::default(), &HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), "no-entries");
    }

    #[test]
    fn serializes_with_stable_field_names() {
        let path = CriticalPath {
            node_ids: vec!["a".to_string()],
            timing: PathTiming {
                optimistic_ms: 1,
                pessimistic_ms: 2,
            },
        };
        let json = serde_json::to_value(&path).unwrap();
        assert_eq!(json["nodeIds"][0], "a");
        assert_eq!(json["timing"]["optimisticMs"], 1);
        assert_eq!(json["timing"]["pessimisticMs"], 2);
    }
}
