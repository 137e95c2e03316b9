//! Neutral workflow model, step registry, and conversions.

pub mod convert;
pub mod graph;
pub mod registry;

pub use convert::{to_definition, to_flow_graph};
pub use graph::{FlowGraph, FlowNode, NodeKind};
pub use registry::StepRegistry;
