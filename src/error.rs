//! Error taxonomy for the pipeline engine.
//!
//! Structural and parse errors are fatal at the call site; execution errors
//! are captured into the run result instead of propagating. Every variant
//! maps to a stable surface name via [`PipelineError::kind`].

use thiserror::Error;

/// All failures the engine can surface.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No remaining step has all dependencies satisfied.
    #[error("cycle detected among steps: {0}")]
    Cycle(String),

    /// A dependency token refers to a step not present in the definition.
    #[error("unknown dependency referenced by step '{step}'")]
    UnknownDependency { step: String },

    /// The same construction token was registered twice in one definition.
    #[error("duplicate registration of step '{0}'")]
    DuplicateRegistration(String),

    /// A registry lookup by name failed.
    #[error("unknown step '{0}'")]
    UnknownStep(String),

    /// A token could not be mapped back to a registry name.
    #[error("token {0} is not backed by a registry entry")]
    UnregisteredToken(u64),

    /// The requested scenario does not exist in the document.
    #[error("scenario '{0}' not found")]
    ScenarioNotFound(String),

    /// The input blob is not a well-formed instance of the dialect.
    #[error("invalid {dialect} document: {message}")]
    InvalidDialect { dialect: String, message: String },

    /// A recognized element violates the dialect schema.
    #[error("schema violation at '{element}': {message}")]
    SchemaViolation { element: String, message: String },

    /// A step raised during execution.
    #[error("step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    /// The wall-clock budget ran out mid-run.
    #[error("execution budget exhausted with {remaining_ms}ms remaining")]
    BudgetExhausted { remaining_ms: u64 },

    /// The graph has no node without predecessors.
    #[error("graph has no entry nodes")]
    NoEntries,

    /// No valid hybrid cut-point exists for the critical path.
    #[error("no hybrid cut point found: {0}")]
    NoCutFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl PipelineError {
    /// Stable, dialect-independent error kind used in exported diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Cycle(_) => "cycle",
            PipelineError::UnknownDependency { .. } => "unknown-dependency",
            PipelineError::DuplicateRegistration(_) => "duplicate-registration",
            PipelineError::UnknownStep(_) => "unknown-step",
            PipelineError::UnregisteredToken(_) => "unregistered-token",
            PipelineError::ScenarioNotFound(_) => "scenario-not-found",
            PipelineError::InvalidDialect { .. } => "invalid-dialect",
            PipelineError::SchemaViolation { .. } => "schema-violation",
            PipelineError::StepFailed { .. } => "step-failure",
            PipelineError::BudgetExhausted { .. } => "budget-exhausted",
            PipelineError::NoEntries => "no-entries",
            PipelineError::NoCutFound(_) => "no-cut-found",
            PipelineError::Serialization(_) => "invalid-dialect",
            PipelineError::Xml(_) => "invalid-dialect",
        }
    }

    /// Dialect-specific locator (state name, step id, element id) if the
    /// error points at a single element.
    pub fn locator(&self) -> Option<&str> {
        match self {
            PipelineError::UnknownDependency { step } => Some(step),
            PipelineError::DuplicateRegistration(name) => Some(name),
            PipelineError::UnknownStep(name) => Some(name),
            PipelineError::ScenarioNotFound(name) => Some(name),
            PipelineError::SchemaViolation { element, .. } => Some(element),
            PipelineError::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}
