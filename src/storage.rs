//! Pipeline storage interface.
//!
//! The core never persists pipelines itself; this trait is what an
//! embedding service implements. The in-memory store exists so the
//! interface has a reference implementation and the tests something to
//! exercise.

use crate::exec::definition::StepMetadata;
use crate::model::graph::FlowGraph;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stored description of a pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub definition: FlowGraph,
    #[serde(default)]
    pub metadata_by_node_id: HashMap<String, StepMetadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRecord {
    pub fn new(id: impl Into<String>, definition: FlowGraph) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: None,
            description: None,
            definition,
            metadata_by_node_id: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Summary row returned by listings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Storage surface consumed by the tool layer.
pub trait PipelineStore: Send + Sync {
    /// Insert or update a record. Updates keep the original `created_at`
    /// and refresh `updated_at`.
    fn save(&self, record: PipelineRecord);
    fn get(&self, id: &str) -> Option<PipelineRecord>;
    fn list(&self) -> Vec<PipelineSummary>;
    fn delete(&self, id: &str) -> bool;
    fn has(&self, id: &str) -> bool;
    fn clear(&self);
}

/// Reference in-memory store.
#[derive(Default)]
pub struct MemoryPipelineStore {
    records: DashMap<String, PipelineRecord>,
}

impl MemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineStore for MemoryPipelineStore {
    fn save(&self, mut record: PipelineRecord) {
        record.updated_at = Utc::now();
        if let Some(existing) = self.records.get(&record.id) {
            record.created_at = existing.created_at;
        }
        self.records.insert(record.id.clone(), record);
    }

    fn get(&self, id: &str) -> Option<PipelineRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    fn list(&self) -> Vec<PipelineSummary> {
        let mut summaries: Vec<PipelineSummary> = self
            .records
            .iter()
            .map(|r| PipelineSummary {
                id: r.id.clone(),
                name: r.name.clone(),
                updated_at: r.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    fn delete(&self, id: &str) -> bool {
        self.records.remove(id).is_some()
    }

    fn has(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    fn clear(&self) {
        self.records.clear();
    }
}
