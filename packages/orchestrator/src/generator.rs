//! Content generator trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use build_core::{ActivityId, ActivityKind, FieldMap};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Content generator failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeneratorError {
    #[error("Generation request failed: {0}")]
    Request(String),

    #[error("Invalid generator output: {0}")]
    InvalidOutput(String),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("All generators failed: {}", .0.join("; "))]
    Exhausted(Vec<String>),
}

/// Result type for content generators.
pub type GeneratorResult = Result<serde_json::Value, GeneratorError>;

/// Future type for async content generators.
pub type GeneratorFuture = Pin<Box<dyn Future<Output = GeneratorResult> + Send>>;

/// Parameters handed to a content generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub activity_id: ActivityId,
    pub kind: ActivityKind,
    pub title: String,
    pub description: String,
    /// Resolved parameters, aliases already applied.
    pub parameters: FieldMap,
}

impl GenerationRequest {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
}

/// AI-backed content generation for one activity kind.
///
/// Implementations should stop work once the token is cancelled.
pub trait ContentGenerator: Send + Sync + 'static {
    /// Name used in logs and aggregated errors.
    fn name(&self) -> &str;

    fn generate(&self, request: &GenerationRequest, cancel: CancellationToken) -> GeneratorFuture;
}

/// Registry mapping activity kinds to their generators.
#[derive(Default, Clone)]
pub struct GeneratorRegistry {
    generators: HashMap<ActivityKind, Arc<dyn ContentGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self {
            generators: HashMap::new(),
        }
    }

    /// Register a generator for a kind, replacing any previous one.
    pub fn register<G: ContentGenerator>(&mut self, kind: ActivityKind, generator: G) {
        self.generators.insert(kind, Arc::new(generator));
    }

    pub fn register_shared(&mut self, kind: ActivityKind, generator: Arc<dyn ContentGenerator>) {
        self.generators.insert(kind, generator);
    }

    pub fn get(&self, kind: ActivityKind) -> Option<Arc<dyn ContentGenerator>> {
        self.generators.get(&kind).cloned()
    }

    pub fn has_generator(&self, kind: ActivityKind) -> bool {
        self.generators.contains_key(&kind)
    }
}

impl std::fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: HashMap<ActivityKind, &str> = self
            .generators
            .iter()
            .map(|(kind, generator)| (*kind, generator.name()))
            .collect();
        f.debug_struct("GeneratorRegistry")
            .field("generators", &names)
            .finish()
    }
}

/// A simple function-based content generator.
pub struct FnGenerator<F>
where
    F: Fn(&GenerationRequest, CancellationToken) -> GeneratorFuture + Send + Sync + 'static,
{
    name: String,
    generate: F,
}

impl<F> FnGenerator<F>
where
    F: Fn(&GenerationRequest, CancellationToken) -> GeneratorFuture + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, generate: F) -> Self {
        Self {
            name: name.into(),
            generate,
        }
    }
}

impl<F> ContentGenerator for FnGenerator<F>
where
    F: Fn(&GenerationRequest, CancellationToken) -> GeneratorFuture + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn generate(&self, request: &GenerationRequest, cancel: CancellationToken) -> GeneratorFuture {
        (self.generate)(request, cancel)
    }
}

/// Tries generators in priority order and returns the first usable output.
pub struct CascadeGenerator {
    name: String,
    levels: Vec<Arc<dyn ContentGenerator>>,
}

impl CascadeGenerator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            levels: Vec::new(),
        }
    }

    /// Append a lower-priority level.
    pub fn then<G: ContentGenerator>(mut self, generator: G) -> Self {
        self.levels.push(Arc::new(generator));
        self
    }

    pub fn then_shared(mut self, generator: Arc<dyn ContentGenerator>) -> Self {
        self.levels.push(generator);
        self
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

fn is_blank_output(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

impl ContentGenerator for CascadeGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate(&self, request: &GenerationRequest, cancel: CancellationToken) -> GeneratorFuture {
        let levels = self.levels.clone();
        let request = request.clone();
        let cascade = self.name.clone();

        Box::pin(async move {
            let mut errors = Vec::with_capacity(levels.len());
            for level in levels {
                if cancel.is_cancelled() {
                    return Err(GeneratorError::Cancelled);
                }
                match level.generate(&request, cancel.child_token()).await {
                    Ok(value) if !is_blank_output(&value) => {
                        tracing::debug!("{}: {} produced content", cascade, level.name());
                        return Ok(value);
                    }
                    Ok(_) => errors.push(format!("{}: empty output", level.name())),
                    Err(GeneratorError::Cancelled) => return Err(GeneratorError::Cancelled),
                    Err(err) => {
                        tracing::warn!("{}: {} failed: {}", cascade, level.name(), err);
                        errors.push(format!("{}: {}", level.name(), err));
                    }
                }
            }
            Err(GeneratorError::Exhausted(errors))
        })
    }
}
