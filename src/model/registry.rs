//! Name-to-step registry bridging string-keyed dialects to token identity.
//!
//! The registry is process-scoped and cheaply clonable; it may be extended
//! between runs but is read-only during one.

use crate::error::PipelineError;
use crate::exec::definition::{StepMetadata, StepToken};
use crate::exec::step::Step;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

type StepCtor = Arc<dyn Fn() -> Arc<dyn Step> + Send + Sync>;

struct RegistryEntry {
    token: StepToken,
    ctor: StepCtor,
    metadata: Option<StepMetadata>,
}

/// Registry of named step constructors with registry-assigned tokens.
#[derive(Clone)]
pub struct StepRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    by_name: HashMap<String, RegistryEntry>,
    names_by_token: HashMap<StepToken, String>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
        }
    }

    /// Register a step constructor under a name. Rejects duplicates.
    pub fn register<F>(&self, name: &str, ctor: F) -> Result<StepToken, PipelineError>
    where
        F: Fn() -> Arc<dyn Step> + Send + Sync + 'static,
    {
        self.register_with_metadata(name, ctor, None)
    }

    /// Register a shared step instance under a name.
    pub fn register_instance(
        &self,
        name: &str,
        step: Arc<dyn Step>,
    ) -> Result<StepToken, PipelineError> {
        self.register_with_metadata(name, move || Arc::clone(&step), None)
    }

    /// Register with default planner metadata attached.
    pub fn register_with_metadata<F>(
        &self,
        name: &str,
        ctor: F,
        metadata: Option<StepMetadata>,
    ) -> Result<StepToken, PipelineError>
    where
        F: Fn() -> Arc<dyn Step> + Send + Sync + 'static,
    {
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(name) {
            return Err(PipelineError::DuplicateRegistration(name.to_string()));
        }
        let token = StepToken::next();
        inner.by_name.insert(
            name.to_string(),
            RegistryEntry {
                token,
                ctor: Arc::new(ctor),
                metadata,
            },
        );
        inner.names_by_token.insert(token, name.to_string());
        info!(name, %token, "registered step");
        Ok(token)
    }

    /// Resolve a name to its construction token.
    pub fn resolve(&self, name: &str) -> Result<StepToken, PipelineError> {
        self.inner
            .read()
            .by_name
            .get(name)
            .map(|e| e.token)
            .ok_or_else(|| PipelineError::UnknownStep(name.to_string()))
    }

    /// Construct the step registered under a name.
    pub fn construct(&self, name: &str) -> Result<Arc<dyn Step>, PipelineError> {
        let inner = self.inner.read();
        let entry = inner
            .by_name
            .get(name)
            .ok_or_else(|| PipelineError::UnknownStep(name.to_string()))?;
        Ok((entry.ctor)())
    }

    /// Default metadata attached at registration, if any.
    pub fn metadata(&self, name: &str) -> Option<StepMetadata> {
        self.inner.read().by_name.get(name).and_then(|e| e.metadata)
    }

    /// Map a token back to its registry name.
    pub fn name_of(&self, token: StepToken) -> Result<String, PipelineError> {
        self.inner
            .read()
            .names_by_token
            .get(&token)
            .cloned()
            .ok_or(PipelineError::UnregisteredToken(token.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().by_name.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().by_name.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::step::{FnStep, PipelineContext};

    fn noop_ctor() -> Arc<dyn Step> {
        Arc::new(FnStep(|_ctx: Arc<PipelineContext>| async { Ok(()) }))
    }

    #[test]
    fn register_and_resolve() {
        let registry = StepRegistry::new();
        let token = registry.register("validate", noop_ctor).unwrap();
        assert_eq!(registry.resolve("validate").unwrap(), token);
        assert_eq!(registry.name_of(token).unwrap(), "validate");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = StepRegistry::new();
        registry.register("x", noop_ctor).unwrap();
        let err = registry.register("x", noop_ctor).unwrap_err();
        assert_eq!(err.kind(), "duplicate-registration");
    }

    #[test]
    fn unknown_name_fails_resolution() {
        let registry = StepRegistry::new();
        let err = registry.resolve("missing").unwrap_err();
        assert_eq!(err.kind(), "unknown-step");
    }

    #[test]
    fn foreign_token_is_unregistered() {
        let registry = StepRegistry::new();
        let err = registry.name_of(StepToken::next()).unwrap_err();
        assert_eq!(err.kind(), "unregistered-token");
    }
}
