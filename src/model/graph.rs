//! Neutral workflow model shared by every dialect adapter.
//!
//! The model is deliberately small: four node kinds, id-based dependency
//! edges, and an opaque config map that carries dialect-specific richness
//! through round-trips untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Closed set of node kinds the core understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Task,
    Pass,
    Choice,
    Parallel,
}

/// One node of the neutral DAG.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Unique id within the graph.
    pub id: String,
    pub kind: NodeKind,
    /// Ids of nodes that must complete before this one. Set semantics,
    /// order irrelevant.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Registry key used to materialize the node into a runnable step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_ref: Option<String>,
    /// Dialect-specific payload preserved verbatim for round-trips.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            depends_on: Vec::new(),
            step_ref: None,
            config: Map::new(),
        }
    }

    pub fn with_dep(mut self, dep: impl Into<String>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    pub fn with_deps(mut self, deps: Vec<String>) -> Self {
        self.depends_on = deps;
        self
    }

    pub fn with_step_ref(mut self, step_ref: impl Into<String>) -> Self {
        self.step_ref = Some(step_ref.into());
        self
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    /// Whether this node depends on the given id.
    pub fn depends_on_id(&self, id: &str) -> bool {
        self.depends_on.iter().any(|d| d == id)
    }
}

/// Adapter-independent DAG of nodes with string ids.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
    /// Explicit entry override; when absent, entries are the nodes with no
    /// dependencies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_ids: Option<Vec<String>>,
}

impl FlowGraph {
    pub fn new(nodes: Vec<FlowNode>) -> Self {
        Self {
            nodes,
            entry_ids: None,
        }
    }

    pub fn with_entries(mut self, entry_ids: Vec<String>) -> Self {
        self.entry_ids = Some(entry_ids);
        self
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Effective entry ids: the explicit override when present, otherwise
    /// every node with an empty dependency set.
    pub fn effective_entries(&self) -> Vec<String> {
        match &self.entry_ids {
            Some(ids) => ids.clone(),
            None => self
                .nodes
                .iter()
                .filter(|n| n.depends_on.is_empty())
                .map(|n| n.id.clone())
                .collect(),
        }
    }

    /// Ids with no successors.
    pub fn sink_ids(&self) -> Vec<String> {
        let mut has_successor: HashSet<&str> = HashSet::new();
        for node in &self.nodes {
            for dep in &node.depends_on {
                has_successor.insert(dep.as_str());
            }
        }
        self.nodes
            .iter()
            .filter(|n| !has_successor.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Successor map derived from the dependency edges.
    pub fn successors(&self) -> HashMap<String, Vec<String>> {
        let mut succ: HashMap<String, Vec<String>> = HashMap::new();
        for node in &self.nodes {
            for dep in &node.depends_on {
                succ.entry(dep.clone()).or_default().push(node.id.clone());
            }
        }
        for list in succ.values_mut() {
            list.sort();
        }
        succ
    }

    /// Per-node planner metadata read from the conventional
    /// `config.metadata` location. Nodes without one are absent from the
    /// returned map.
    pub fn metadata_by_node(&self) -> HashMap<String, crate::exec::StepMetadata> {
        let mut out = HashMap::new();
        for node in &self.nodes {
            if let Some(meta) = node.config.get("metadata") {
                if let Ok(parsed) =
                    serde_json::from_value::<crate::exec::StepMetadata>(meta.clone())
                {
                    out.insert(node.id.clone(), parsed);
                }
            }
        }
        out
    }
}
