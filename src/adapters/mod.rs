//! Dialect adapters over the neutral model.
//!
//! Every adapter is a pure data transform: `import` parses a blob into a
//! [`FlowGraph`] plus non-fatal warnings, `export` renders a graph back
//! into the dialect. Non-mappable constructs are dropped on import and
//! refused on export, always with a structured warning; the core never
//! logs them away.

pub mod process_xml;
pub mod scenario;
pub mod state_machine;

use crate::error::PipelineError;
use crate::model::graph::FlowGraph;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

pub use process_xml::ProcessXmlAdapter;
pub use scenario::ScenarioAdapter;
pub use state_machine::StateMachineAdapter;

/// Non-fatal diagnostic attached to an import or export.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterWarning {
    /// Dialect-specific locator: state name, step id, or element id.
    pub element_id: String,
    /// What the element was (its dialect kind or construct name).
    pub kind: String,
    pub reason: String,
}

impl AdapterWarning {
    pub fn new(
        element_id: impl Into<String>,
        kind: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            element_id: element_id.into(),
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}

/// Result of importing a dialect blob.
#[derive(Debug)]
pub struct ImportOutcome {
    pub graph: FlowGraph,
    pub warnings: Vec<AdapterWarning>,
    /// Document-level fields (comments, versions, info blocks) that have no
    /// home in the neutral model; feed them back through [`ExportOptions`]
    /// for a faithful round-trip.
    pub document: Map<String, Value>,
}

/// Result of exporting a graph into a dialect blob.
#[derive(Debug)]
pub struct ExportOutcome {
    pub blob: String,
    pub warnings: Vec<AdapterWarning>,
}

/// Caller-supplied export knobs shared by the adapters.
#[derive(Debug, Default, Clone)]
pub struct ExportOptions {
    /// Document-level fields to re-emit (see [`ImportOutcome::document`]).
    pub document: Map<String, Value>,
    /// Name under which the scenario adapter exports its steps.
    pub scenario_name: Option<String>,
}

/// Deterministic emission order: topological levels over the dependency
/// edges with an id-lexicographic tie-break inside each level. Exported
/// blobs are byte-stable because of this plus sorted JSON object keys.
pub(crate) fn emission_order(graph: &FlowGraph) -> Result<Vec<String>, PipelineError> {
    let mut indices = HashMap::new();
    let mut petgraph: DiGraph<&str, ()> = DiGraph::new();
    for node in &graph.nodes {
        let idx = petgraph.add_node(node.id.as_str());
        indices.insert(node.id.as_str(), idx);
    }
    for node in &graph.nodes {
        for dep in &node.depends_on {
            if let Some(&src) = indices.get(dep.as_str()) {
                petgraph.add_edge(src, indices[node.id.as_str()], ());
            }
        }
    }
    if is_cyclic_directed(&petgraph) {
        let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        return Err(PipelineError::Cycle(ids.join(", ")));
    }

    let mut resolved: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&crate::model::graph::FlowNode> = graph.nodes.iter().collect();
    let mut order = Vec::with_capacity(graph.nodes.len());

    while !remaining.is_empty() {
        let mut wave: Vec<&str> = remaining
            .iter()
            .filter(|n| {
                n.depends_on
                    .iter()
                    .all(|d| resolved.contains(d.as_str()) || !indices.contains_key(d.as_str()))
            })
            .map(|n| n.id.as_str())
            .collect();
        wave.sort_unstable();

        if wave.is_empty() {
            // Unreachable given the cycle check above, but a stall must
            // never loop forever.
            let stuck: Vec<&str> = remaining.iter().map(|n| n.id.as_str()).collect();
            return Err(PipelineError::Cycle(stuck.join(", ")));
        }

        for id in &wave {
            resolved.insert(id);
            order.push(id.to_string());
        }
        remaining.retain(|n| !resolved.contains(n.id.as_str()));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::graph::{FlowNode, NodeKind};

    #[test]
    fn emission_order_is_topological_with_lexicographic_ties() {
        let graph = FlowGraph::new(vec![
            FlowNode::new("zeta", NodeKind::Task),
            FlowNode::new("alpha", NodeKind::Task),
            FlowNode::new("mid", NodeKind::Task).with_dep("zeta"),
            FlowNode::new("end", NodeKind::Task)
                .with_dep("mid")
                .with_dep("alpha"),
        ]);

        let order = emission_order(&graph).unwrap();
        assert_eq!(order, vec!["alpha", "zeta", "mid", "end"]);
    }

    #[test]
    fn cyclic_graph_is_rejected() {
        let graph = FlowGraph::new(vec![
            FlowNode::new("a", NodeKind::Task).with_dep("b"),
            FlowNode::new("b", NodeKind::Task).with_dep("a"),
        ]);
        assert_eq!(emission_order(&graph).unwrap_err().kind(), "cycle");
    }
}
