//! Shared fixtures and helpers for the integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tokio::time::Duration;
use virta::{FlowGraph, FlowNode, NodeKind, PipelineContext, Step, StepRegistry};

/// Step that records its label into a shared log and mirrors it into the
/// context target under its own key.
pub struct RecordingStep {
    pub label: String,
    pub log: Arc<Mutex<Vec<String>>>,
    pub sleep: Option<Duration>,
    pub fail_with: Option<String>,
    pub request_stop: bool,
}

impl RecordingStep {
    pub fn new(label: &str, log: Arc<Mutex<Vec<String>>>) -> Arc<dyn Step> {
        Arc::new(Self {
            label: label.to_string(),
            log,
            sleep: None,
            fail_with: None,
            request_stop: false,
        })
    }

    pub fn sleeping(label: &str, log: Arc<Mutex<Vec<String>>>, sleep: Duration) -> Arc<dyn Step> {
        Arc::new(Self {
            label: label.to_string(),
            log,
            sleep: Some(sleep),
            fail_with: None,
            request_stop: false,
        })
    }

    pub fn failing(label: &str, log: Arc<Mutex<Vec<String>>>, message: &str) -> Arc<dyn Step> {
        Arc::new(Self {
            label: label.to_string(),
            log,
            sleep: None,
            fail_with: Some(message.to_string()),
            request_stop: false,
        })
    }

    pub fn stopping(label: &str, log: Arc<Mutex<Vec<String>>>) -> Arc<dyn Step> {
        Arc::new(Self {
            label: label.to_string(),
            log,
            sleep: None,
            fail_with: None,
            request_stop: true,
        })
    }
}

#[async_trait]
impl Step for RecordingStep {
    async fn run(&self, ctx: Arc<PipelineContext>) -> anyhow::Result<()> {
        if let Some(duration) = self.sleep {
            tokio::time::sleep(duration).await;
        }
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{message}");
        }
        self.log.lock().push(self.label.clone());
        ctx.set_target(&self.label, json!(true))?;
        if self.request_stop {
            ctx.request_stop();
        }
        Ok(())
    }
}

/// Registry with a no-op recording step under each given name.
pub fn registry_with(names: &[&str], log: Arc<Mutex<Vec<String>>>) -> StepRegistry {
    let registry = StepRegistry::new();
    for name in names {
        let log = Arc::clone(&log);
        let label = name.to_string();
        registry
            .register(name, move || {
                Arc::new(RecordingStep {
                    label: label.clone(),
                    log: Arc::clone(&log),
                    sleep: None,
                    fail_with: None,
                    request_stop: false,
                }) as Arc<dyn Step>
            })
            .unwrap();
    }
    registry
}

/// Diamond fixture: fetch fans out to enrich/score which join into publish.
pub fn diamond_graph() -> FlowGraph {
    FlowGraph::new(vec![
        FlowNode::new("fetch", NodeKind::Task).with_step_ref("fetch"),
        FlowNode::new("enrich", NodeKind::Task)
            .with_step_ref("enrich")
            .with_dep("fetch"),
        FlowNode::new("score", NodeKind::Task)
            .with_step_ref("score")
            .with_dep("fetch"),
        FlowNode::new("publish", NodeKind::Task)
            .with_step_ref("publish")
            .with_dep("enrich")
            .with_dep("score"),
    ])
}

pub fn diamond_names() -> [&'static str; 4] {
    ["fetch", "enrich", "score", "publish"]
}

/// Branching fixture with every node kind: a task feeding a choice whose
/// arms (a pass and a task) rejoin into a final task.
pub fn branching_graph() -> FlowGraph {
    FlowGraph::new(vec![
        FlowNode::new("start", NodeKind::Task).with_step_ref("start"),
        FlowNode::new("gate", NodeKind::Choice)
            .with_step_ref("gate")
            .with_dep("start"),
        FlowNode::new("fast", NodeKind::Pass)
            .with_step_ref("fast")
            .with_dep("gate"),
        FlowNode::new("slow", NodeKind::Task)
            .with_step_ref("slow")
            .with_dep("gate"),
        FlowNode::new("done", NodeKind::Task)
            .with_step_ref("done")
            .with_dep("fast")
            .with_dep("slow"),
    ])
}
