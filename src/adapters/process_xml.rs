//! BPMN-shaped process XML dialect.
//!
//! Start and end events never become nodes: a flow out of the start event
//! only marks its target as an entry, and flows into the end event are
//! implicit. Every other `sequenceFlow(source -> target)` becomes a
//! dependency of `target` on `source`.

use crate::adapters::{emission_order, AdapterWarning, ExportOptions, ExportOutcome, ImportOutcome};
use crate::error::PipelineError;
use crate::model::graph::{FlowGraph, FlowNode, NodeKind};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

const DIALECT: &str = "process-xml";

/// Reserved config key carrying the original element's local name so a
/// `serviceTask` does not come back as a plain `task`.
const ELEMENT_KEY: &str = "element";

const DEFAULT_BPMN_NS: &str = "http://www.omg.org/spec/BPMN/20100524/MODEL";

/// Bidirectional adapter for the process XML dialect.
#[derive(Debug, Default)]
pub struct ProcessXmlAdapter;

struct RawFlow {
    source: String,
    target: String,
}

#[derive(Default)]
struct ImportState {
    nodes: Vec<FlowNode>,
    node_index: HashMap<String, usize>,
    start_ids: HashSet<String>,
    end_ids: HashSet<String>,
    dropped: HashSet<String>,
    flows: Vec<RawFlow>,
    warnings: Vec<AdapterWarning>,
    document: Map<String, Value>,
    saw_process: bool,
}

impl ProcessXmlAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Parse a process document into the neutral model.
    pub fn import(&self, blob: &str) -> Result<ImportOutcome, PipelineError> {
        let mut reader = Reader::from_str(blob);
        let mut state = ImportState::default();

        // Open-element depth; flow elements are the direct children of the
        // single process element.
        let mut depth: usize = 0;
        let mut process_depth: Option<usize> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    let child_of_process = process_depth == Some(depth.wrapping_sub(1));
                    handle_element(&start, depth, &mut process_depth, child_of_process, &mut state)?;
                    depth += 1;
                }
                Ok(Event::Empty(start)) => {
                    let child_of_process = process_depth == Some(depth.wrapping_sub(1));
                    handle_element(&start, depth, &mut process_depth, child_of_process, &mut state)?;
                    if process_depth == Some(depth) {
                        // An empty process element holds nothing.
                        process_depth = None;
                    }
                }
                Ok(Event::End(_)) => {
                    depth = depth.saturating_sub(1);
                    if process_depth == Some(depth) {
                        process_depth = None;
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(invalid(&e.to_string())),
            }
        }

        if !state.saw_process {
            return Err(invalid("document contains no process element"));
        }

        let mut entries: Vec<String> = Vec::new();
        let flows = std::mem::take(&mut state.flows);
        for flow in &flows {
            let from_start = state.start_ids.contains(&flow.source);
            let into_end = state.end_ids.contains(&flow.target);

            if from_start {
                if let Some(&idx) = state.node_index.get(&flow.target) {
                    let id = state.nodes[idx].id.clone();
                    if !entries.contains(&id) {
                        entries.push(id);
                    }
                } else if !into_end {
                    state.warnings.push(AdapterWarning::new(
                        flow.target.clone(),
                        "sequenceFlow",
                        "start event flows into an element that was not imported",
                    ));
                }
                continue;
            }
            if into_end {
                if !state.node_index.contains_key(&flow.source) {
                    state.warnings.push(AdapterWarning::new(
                        flow.source.clone(),
                        "sequenceFlow",
                        "end event is reached from an element that was not imported",
                    ));
                }
                continue;
            }

            match (
                state.node_index.contains_key(&flow.source),
                state.node_index.get(&flow.target).copied(),
            ) {
                (true, Some(target_idx)) => {
                    let source = flow.source.clone();
                    let target = &mut state.nodes[target_idx];
                    if !target.depends_on_id(&source) {
                        target.depends_on.push(source);
                    }
                }
                _ => {
                    let missing = if state.node_index.contains_key(&flow.source) {
                        &flow.target
                    } else {
                        &flow.source
                    };
                    state.warnings.push(AdapterWarning::new(
                        missing.clone(),
                        "sequenceFlow",
                        "flow endpoint was dropped or never declared; edge removed",
                    ));
                }
            }
        }

        debug!(
            nodes = state.nodes.len(),
            flows = flows.len(),
            dropped = state.dropped.len(),
            "imported process"
        );

        let mut graph = FlowGraph::new(state.nodes);
        if !entries.is_empty() {
            graph = graph.with_entries(entries);
        }

        Ok(ImportOutcome {
            graph,
            warnings: state.warnings,
            document: state.document,
        })
    }

    /// Render a neutral graph as a process document.
    ///
    /// One synthetic start and end event anchor the graph: entry nodes gain
    /// a flow from the start event, sinks a flow to the end event.
    pub fn export(
        &self,
        graph: &FlowGraph,
        opts: &ExportOptions,
    ) -> Result<ExportOutcome, PipelineError> {
        let order = emission_order(graph)?;
        let entries = graph.effective_entries();
        if entries.is_empty() && !graph.is_empty() {
            return Err(PipelineError::NoEntries);
        }

        let mut warnings = Vec::new();
        let mut out = String::with_capacity(1024);
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

        let definitions_attrs = definition_attrs(&opts.document);
        out.push_str("<bpmn:definitions");
        for (key, value) in &definitions_attrs {
            push_attr(&mut out, key, value);
        }
        out.push_str(">\n");

        let process_attrs = process_attrs(&opts.document);
        out.push_str("  <bpmn:process");
        for (key, value) in &process_attrs {
            push_attr(&mut out, key, value);
        }
        out.push_str(">\n");

        out.push_str("    <bpmn:startEvent id=\"StartEvent_1\"/>\n");

        for id in &order {
            let node = graph.node(id).expect("emission order covers graph nodes");
            let element = element_name_for(node, &mut warnings);
            out.push_str("    <bpmn:");
            out.push_str(&element);
            push_attr(&mut out, "id", &node.id);
            for (key, value) in attribute_config(node) {
                push_attr(&mut out, &key, &value);
            }
            out.push_str("/>\n");
        }

        out.push_str("    <bpmn:endEvent id=\"EndEvent_1\"/>\n");

        let mut flows: Vec<(String, String)> = Vec::new();
        for entry in &entries {
            flows.push(("StartEvent_1".to_string(), entry.clone()));
        }
        for node in &graph.nodes {
            for dep in &node.depends_on {
                flows.push((dep.clone(), node.id.clone()));
            }
        }
        for sink in graph.sink_ids() {
            flows.push((sink, "EndEvent_1".to_string()));
        }
        flows.sort();
        flows.dedup();

        for (source, target) in &flows {
            out.push_str("    <bpmn:sequenceFlow");
            push_attr(&mut out, "id", &format!("Flow_{source}_{target}"));
            push_attr(&mut out, "sourceRef", source);
            push_attr(&mut out, "targetRef", target);
            out.push_str("/>\n");
        }

        out.push_str("  </bpmn:process>\n");
        out.push_str("</bpmn:definitions>\n");

        Ok(ExportOutcome {
            blob: out,
            warnings,
        })
    }
}

fn handle_element(
    start: &BytesStart<'_>,
    depth: usize,
    process_depth: &mut Option<usize>,
    child_of_process: bool,
    state: &mut ImportState,
) -> Result<(), PipelineError> {
    let raw_local = local_name(start.name().as_ref());
    let local = raw_local.to_ascii_lowercase();

    match local.as_str() {
        "definitions" => {
            let attrs = collect_attributes(start)?;
            state
                .document
                .insert("definitions".to_string(), attrs_to_value(&attrs));
            return Ok(());
        }
        "process" => {
            if state.saw_process {
                return Err(invalid("document contains more than one process element"));
            }
            state.saw_process = true;
            *process_depth = Some(depth);
            let attrs = collect_attributes(start)?;
            state
                .document
                .insert("process".to_string(), attrs_to_value(&attrs));
            return Ok(());
        }
        _ => {}
    }

    if !child_of_process {
        // Nested content of tasks and gateways (documentation, extension
        // elements) carries nothing the neutral model understands.
        return Ok(());
    }

    let attrs = collect_attributes(start)?;

    let kind = match local.as_str() {
        "task" | "servicetask" | "usertask" | "scripttask" => Some(NodeKind::Task),
        "exclusivegateway" => Some(NodeKind::Choice),
        "parallelgateway" => Some(NodeKind::Parallel),
        "inclusivegateway" => {
            let id = attrs.get("id").cloned().unwrap_or_else(|| raw_local.clone());
            state.warnings.push(AdapterWarning::new(
                id,
                raw_local.clone(),
                "inclusive gateway treated as a parallel gateway",
            ));
            Some(NodeKind::Parallel)
        }
        "startevent" => {
            let id = require_id(&attrs, &raw_local)?;
            state.start_ids.insert(id);
            return Ok(());
        }
        "endevent" => {
            let id = require_id(&attrs, &raw_local)?;
            state.end_ids.insert(id);
            return Ok(());
        }
        "sequenceflow" => {
            let source = attrs.get("sourceRef").cloned().ok_or_else(|| {
                PipelineError::SchemaViolation {
                    element: attrs.get("id").cloned().unwrap_or_else(|| raw_local.clone()),
                    message: "sequence flow has no sourceRef".to_string(),
                }
            })?;
            let target = attrs.get("targetRef").cloned().ok_or_else(|| {
                PipelineError::SchemaViolation {
                    element: attrs.get("id").cloned().unwrap_or_else(|| raw_local.clone()),
                    message: "sequence flow has no targetRef".to_string(),
                }
            })?;
            state.flows.push(RawFlow { source, target });
            return Ok(());
        }
        // Structural noise we can skip without comment.
        "laneset" | "lane" | "documentation" | "extensionelements" => return Ok(()),
        _ => None,
    };

    let Some(kind) = kind else {
        // A flow element we cannot map: drop it, remember the id so flows
        // touching it warn instead of silently vanishing.
        if let Some(id) = attrs.get("id") {
            state.dropped.insert(id.clone());
            state.warnings.push(AdapterWarning::new(
                id.clone(),
                raw_local,
                "element has no neutral mapping; dropped",
            ));
        }
        return Ok(());
    };

    let id = require_id(&attrs, &raw_local)?;
    let step_ref = attrs.get("name").cloned().unwrap_or_else(|| id.clone());

    let mut config = Map::new();
    config.insert(ELEMENT_KEY.to_string(), json!(raw_local));
    for (key, value) in &attrs {
        if key != "id" {
            config.insert(key.clone(), json!(value));
        }
    }

    state.node_index.insert(id.clone(), state.nodes.len());
    state.nodes.push(
        FlowNode::new(id, kind)
            .with_step_ref(step_ref)
            .with_config(config),
    );
    Ok(())
}

fn require_id(
    attrs: &BTreeMap<String, String>,
    element: &str,
) -> Result<String, PipelineError> {
    attrs
        .get("id")
        .cloned()
        .ok_or_else(|| PipelineError::SchemaViolation {
            element: element.to_string(),
            message: "flow element has no id".to_string(),
        })
}

fn invalid(message: &str) -> PipelineError {
    PipelineError::InvalidDialect {
        dialect: DIALECT.to_string(),
        message: message.to_string(),
    }
}

fn local_name(qname: &[u8]) -> String {
    let bytes = match qname.iter().rposition(|b| *b == b':') {
        Some(pos) => &qname[pos + 1..],
        None => qname,
    };
    String::from_utf8_lossy(bytes).to_string()
}

fn collect_attributes(start: &BytesStart<'_>) -> Result<BTreeMap<String, String>, PipelineError> {
    let mut attrs = BTreeMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| invalid(&e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| invalid(&e.to_string()))?
            .to_string();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn attrs_to_value(attrs: &BTreeMap<String, String>) -> Value {
    let map: Map<String, Value> = attrs.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
    Value::Object(map)
}

/// Element to emit for a node, warning when the neutral kind has no exact
/// dialect counterpart.
fn element_name_for(node: &FlowNode, warnings: &mut Vec<AdapterWarning>) -> String {
    if let Some(element) = node.config.get(ELEMENT_KEY).and_then(Value::as_str) {
        let matches_kind = match node.kind {
            NodeKind::Task => matches!(
                element.to_ascii_lowercase().as_str(),
                "task" | "servicetask" | "usertask" | "scripttask"
            ),
            NodeKind::Choice => element.eq_ignore_ascii_case("exclusiveGateway"),
            NodeKind::Parallel => {
                element.eq_ignore_ascii_case("parallelGateway")
                    || element.eq_ignore_ascii_case("inclusiveGateway")
            }
            NodeKind::Pass => false,
        };
        if matches_kind {
            return element.to_string();
        }
    }

    match node.kind {
        NodeKind::Task => "task".to_string(),
        NodeKind::Pass => {
            warnings.push(AdapterWarning::new(
                node.id.clone(),
                "pass",
                "pass node exported as a plain task",
            ));
            "task".to_string()
        }
        NodeKind::Choice => "exclusiveGateway".to_string(),
        NodeKind::Parallel => "parallelGateway".to_string(),
    }
}

/// String-valued config entries become attributes again; structured values
/// (planner metadata and the like) have no attribute form and stay behind.
fn attribute_config(node: &FlowNode) -> Vec<(String, String)> {
    let mut attrs: Vec<(String, String)> = node
        .config
        .iter()
        .filter(|(key, _)| key.as_str() != ELEMENT_KEY)
        .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
        .collect();
    attrs.sort();
    attrs
}

fn definition_attrs(document: &Map<String, Value>) -> Vec<(String, String)> {
    let mut attrs: Vec<(String, String)> = document
        .get("definitions")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    if !attrs.iter().any(|(k, _)| k == "xmlns:bpmn") {
        attrs.push(("xmlns:bpmn".to_string(), DEFAULT_BPMN_NS.to_string()));
    }
    if !attrs.iter().any(|(k, _)| k == "id") {
        attrs.push(("id".to_string(), "Definitions_1".to_string()));
    }
    attrs.sort();
    attrs
}

fn process_attrs(document: &Map<String, Value>) -> Vec<(String, String)> {
    let mut attrs: Vec<(String, String)> = document
        .get("process")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    if !attrs.iter().any(|(k, _)| k == "id") {
        attrs.push(("id".to_string(), "Process_1".to_string()));
    }
    attrs.sort();
    attrs
}

fn push_attr(out: &mut String, key: &str, value: &str) {
    out.push(' ');
    out.push_str(key);
    out.push_str("=\"");
    out.push_str(&escape_attr(value));
    out.push('"');
}

fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    const REVIEW_PROCESS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL" id="Definitions_1">
  <bpmn:process id="Process_1" isExecutable="true">
    <bpmn:startEvent id="Start_1"/>
    <bpmn:serviceTask id="Ingest" name="ingest"/>
    <bpmn:parallelGateway id="Split"/>
    <bpmn:task id="Score" name="score"/>
    <bpmn:task id="Audit" name="audit"/>
    <bpmn:exclusiveGateway id="Gate"/>
    <bpmn:endEvent id="End_1"/>
    <bpmn:sequenceFlow id="f1" sourceRef="Start_1" targetRef="Ingest"/>
    <bpmn:sequenceFlow id="f2" sourceRef="Ingest" targetRef="Split"/>
    <bpmn:sequenceFlow id="f3" sourceRef="Split" targetRef="Score"/>
    <bpmn:sequenceFlow id="f4" sourceRef="Split" targetRef="Audit"/>
    <bpmn:sequenceFlow id="f5" sourceRef="Score" targetRef="Gate"/>
    <bpmn:sequenceFlow id="f6" sourceRef="Audit" targetRef="Gate"/>
    <bpmn:sequenceFlow id="f7" sourceRef="Gate" targetRef="End_1"/>
  </bpmn:process>
</bpmn:definitions>
"#;

    #[test]
    fn imports_tasks_gateways_and_flows() {
        let outcome = ProcessXmlAdapter::new().import(REVIEW_PROCESS).unwrap();
        let graph = &outcome.graph;

        assert_eq!(graph.len(), 5);
        assert!(outcome.warnings.is_empty());

        let ingest = graph.node("Ingest").unwrap();
        assert_eq!(ingest.kind, NodeKind::Task);
        assert_eq!(ingest.step_ref.as_deref(), Some("ingest"));
        assert!(ingest.depends_on.is_empty());

        assert_eq!(graph.node("Split").unwrap().kind, NodeKind::Parallel);
        assert_eq!(graph.node("Gate").unwrap().kind, NodeKind::Choice);
        assert!(graph.node("Score").unwrap().depends_on_id("Split"));
        assert!(graph.node("Gate").unwrap().depends_on_id("Audit"));

        // Start-event flows mark entries instead of creating edges.
        assert_eq!(graph.effective_entries(), vec!["Ingest"]);
    }

    #[test]
    fn inclusive_gateway_downgrades_with_warning() {
        let blob = r#"<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL">
  <bpmn:process id="P">
    <bpmn:task id="A"/>
    <bpmn:inclusiveGateway id="Or"/>
    <bpmn:sequenceFlow id="f" sourceRef="A" targetRef="Or"/>
  </bpmn:process>
</bpmn:definitions>"#;

        let outcome = ProcessXmlAdapter::new().import(blob).unwrap();
        assert_eq!(outcome.graph.node("Or").unwrap().kind, NodeKind::Parallel);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].element_id, "Or");
    }

    #[test]
    fn unmappable_elements_drop_and_flows_warn() {
        let blob = r#"<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL">
  <bpmn:process id="P">
    <bpmn:task id="A"/>
    <bpmn:subProcess id="Sub"/>
    <bpmn:sequenceFlow id="f" sourceRef="A" targetRef="Sub"/>
  </bpmn:process>
</bpmn:definitions>"#;

        let outcome = ProcessXmlAdapter::new().import(blob).unwrap();
        assert_eq!(outcome.graph.len(), 1);
        assert_eq!(outcome.warnings.len(), 2);
        assert_eq!(outcome.warnings[0].element_id, "Sub");
        assert_eq!(outcome.warnings[1].kind, "sequenceFlow");
    }

    #[test]
    fn missing_process_is_invalid() {
        let err = ProcessXmlAdapter::new()
            .import("<bpmn:definitions xmlns:bpmn=\"x\"/>")
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-dialect");
    }

    #[test]
    fn export_anchors_entries_and_sinks() {
        let graph = FlowGraph::new(vec![
            FlowNode::new("a", NodeKind::Task),
            FlowNode::new("b", NodeKind::Task).with_dep("a"),
        ]);

        let outcome = ProcessXmlAdapter::new()
            .export(&graph, &ExportOptions::default())
            .unwrap();
        assert!(outcome.blob.contains("sourceRef=\"StartEvent_1\" targetRef=\"a\""));
        assert!(outcome.blob.contains("sourceRef=\"a\" targetRef=\"b\""));
        assert!(outcome.blob.contains("sourceRef=\"b\" targetRef=\"EndEvent_1\""));
    }

    #[test]
    fn round_trip_preserves_structure() {
        let adapter = ProcessXmlAdapter::new();
        let first = adapter.import(REVIEW_PROCESS).unwrap();

        let opts = ExportOptions {
            document: first.document.clone(),
            ..Default::default()
        };
        let exported = adapter.export(&first.graph, &opts).unwrap();
        let second = adapter.import(&exported.blob).unwrap();

        assert_eq!(first.graph.len(), second.graph.len());
        for node in &first.graph.nodes {
            let round = second.graph.node(&node.id).unwrap();
            assert_eq!(node.kind, round.kind);
            let mut expected = node.depends_on.clone();
            let mut actual = round.depends_on.clone();
            expected.sort();
            actual.sort();
            assert_eq!(expected, actual);
        }
        assert_eq!(
            first.graph.effective_entries(),
            second.graph.effective_entries()
        );
    }

    #[test]
    fn export_is_byte_stable() {
        let adapter = ProcessXmlAdapter::new();
        let outcome = adapter.import(REVIEW_PROCESS).unwrap();
        let opts = ExportOptions {
            document: outcome.document.clone(),
            ..Default::default()
        };
        let first = adapter.export(&outcome.graph, &opts).unwrap();
        let second = adapter.export(&outcome.graph, &opts).unwrap();
        assert_eq!(first.blob, second.blob);
    }
}
