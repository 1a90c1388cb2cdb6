//! Per-activity build strategy selection.
//!
//! Dispatch order:
//! 1. pre-generated shortcut when the activity already carries enough fields
//! 2. the kind's routine with its registered content generator
//! 3. the generation bridge for everything else
//! 4. a local placeholder when the chosen generator fails or returns junk

use std::sync::Arc;
use std::time::Duration;

use build_core::{
    ActivityMetadata, ArtifactEnvelope, ArtifactStore, BuildError, BuildEvent, BuildResult,
    BuildStrategy, CONSTRUCTED_INDEX_KEY, ConstructedEntry, ConstructedIndex,
    ConstructionActivity, FieldMap, NewArtifact, PersistenceAdapter, RequestId, StoreError,
    activity_key, constructed_key, index_entry_label,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bridge::GenerationBridge;
use crate::bus::EventBus;
use crate::controller::BuildFuture;
use crate::generator::{ContentGenerator, GenerationRequest, GeneratorError, GeneratorRegistry};
use crate::routine::{self, Routine};

/// Strategy selector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoBuildConfig {
    /// Populated custom fields at which an activity counts as pre-generated.
    pub pregenerated_field_threshold: usize,
    /// Entries in a placeholder artifact.
    pub fallback_item_count: usize,
    /// How long the bridge path waits for a handle to be registered.
    pub bridge_wait_ms: u64,
}

impl Default for AutoBuildConfig {
    fn default() -> Self {
        Self {
            pregenerated_field_threshold: 3,
            fallback_item_count: 5,
            bridge_wait_ms: 5_000,
        }
    }
}

impl AutoBuildConfig {
    pub fn bridge_wait(&self) -> Duration {
        Duration::from_millis(self.bridge_wait_ms)
    }
}

/// What a successful build produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
    pub request_id: RequestId,
    pub strategy: BuildStrategy,
    pub is_placeholder: bool,
    pub data: Value,
    pub item_count: usize,
    /// Artifact keys found after persisting.
    pub storage_keys: Vec<String>,
    pub built_at: DateTime<Utc>,
}

/// Callback invoked after every successful build.
pub type BuiltCallback = Arc<dyn Fn(&ConstructionActivity, &BuildOutcome) + Send + Sync>;

struct Generated {
    strategy: BuildStrategy,
    data: Value,
    item_count: usize,
    surface_keys: Vec<String>,
}

/// Produces and persists the artifact for one activity.
pub struct AutoBuildService {
    bridge: GenerationBridge,
    generators: GeneratorRegistry,
    store: Arc<dyn ArtifactStore>,
    persistence: Option<Arc<dyn PersistenceAdapter>>,
    owner_id: String,
    bus: Option<EventBus>,
    config: AutoBuildConfig,
    on_built: Option<BuiltCallback>,
    /// Serialises read-modify-write of the global index.
    index_lock: Mutex<()>,
}

impl AutoBuildService {
    pub fn new(bridge: GenerationBridge, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            bridge,
            generators: GeneratorRegistry::new(),
            store,
            persistence: None,
            owner_id: String::new(),
            bus: None,
            config: AutoBuildConfig::default(),
            on_built: None,
            index_lock: Mutex::new(()),
        }
    }

    pub fn with_generators(mut self, generators: GeneratorRegistry) -> Self {
        self.generators = generators;
        self
    }

    /// Forward finished artifacts to an external repository, best-effort.
    pub fn with_persistence(
        mut self,
        adapter: Arc<dyn PersistenceAdapter>,
        owner_id: impl Into<String>,
    ) -> Self {
        self.persistence = Some(adapter);
        self.owner_id = owner_id.into();
        self
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_config(mut self, config: AutoBuildConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_built(
        mut self,
        callback: impl Fn(&ConstructionActivity, &BuildOutcome) + Send + Sync + 'static,
    ) -> Self {
        self.on_built = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &AutoBuildConfig {
        &self.config
    }

    /// Adapt the service into a queue build function.
    pub fn build_fn(
        self: Arc<Self>,
    ) -> impl Fn(ConstructionActivity, CancellationToken) -> BuildFuture + Send + Sync + 'static
    {
        move |mut activity: ConstructionActivity, cancel: CancellationToken| -> BuildFuture {
            let service = Arc::clone(&self);
            Box::pin(async move {
                service
                    .build_activity(&mut activity, cancel)
                    .await
                    .map(|_| true)
            })
        }
    }

    /// Build one activity and update its status fields.
    pub async fn build_activity(
        &self,
        activity: &mut ConstructionActivity,
        cancel: CancellationToken,
    ) -> Result<BuildOutcome, BuildError> {
        let request_id = RequestId::new();
        let result = self.build_inner(activity, request_id, &cancel).await;

        match &result {
            Ok(outcome) => {
                activity.mark_built(outcome.built_at);
                tracing::info!(
                    "Built {} via {}{}",
                    activity.id,
                    outcome.strategy,
                    if outcome.is_placeholder { " (placeholder)" } else { "" }
                );
                if let Some(callback) = &self.on_built {
                    callback(activity, outcome);
                }
                self.publish(BuildResult::success(
                    activity.id.clone(),
                    request_id,
                    outcome.data.clone(),
                    outcome.storage_keys.clone(),
                ));
            }
            Err(err) => {
                activity.mark_error();
                tracing::warn!("Build of {} failed: {}", activity.id, err);
                self.publish(BuildResult::failure(
                    activity.id.clone(),
                    request_id,
                    err.to_string(),
                ));
            }
        }
        result
    }

    async fn build_inner(
        &self,
        activity: &mut ConstructionActivity,
        request_id: RequestId,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome, BuildError> {
        let missing = activity.missing_required_fields();
        if !missing.is_empty() {
            return Err(BuildError::validation(missing));
        }
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        activity.mark_in_progress(10);

        let kind = activity.kind();
        let routine = Routine::for_kind(kind);
        let generator = routine.and_then(|_| self.generators.get(kind));

        let pregenerated =
            activity.populated_field_count() >= self.config.pregenerated_field_threshold;
        let generated = if pregenerated {
            tracing::debug!(
                "{} carries {} populated fields, using them as the artifact",
                activity.id,
                activity.populated_field_count()
            );
            self.pregenerated(activity)
        } else if let (Some(routine), Some(generator)) = (routine, generator) {
            self.generate_with(routine, generator, activity, cancel).await?
        } else {
            self.build_via_bridge(activity, request_id, cancel).await?
        };

        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        activity.mark_in_progress(90);

        let built_at = Utc::now();
        let storage_keys = self.persist(activity, &generated, built_at).await?;
        self.forward_to_repository(activity, &generated.data).await;

        Ok(BuildOutcome {
            request_id,
            strategy: generated.strategy,
            is_placeholder: generated.strategy == BuildStrategy::Fallback,
            data: generated.data,
            item_count: generated.item_count,
            storage_keys,
            built_at,
        })
    }

    fn pregenerated(&self, activity: &ConstructionActivity) -> Generated {
        let mut data = serde_json::Map::new();
        data.insert("title".to_string(), Value::String(activity.title.clone()));
        data.insert(
            "description".to_string(),
            Value::String(activity.description.clone()),
        );
        for (key, value) in activity.custom_fields.iter().filter(|(_, v)| !v.trim().is_empty()) {
            data.insert(key.clone(), Value::String(value.clone()));
        }
        Generated {
            strategy: BuildStrategy::Pregenerated,
            data: Value::Object(data),
            item_count: activity.populated_field_count(),
            surface_keys: Vec::new(),
        }
    }

    async fn generate_with(
        &self,
        routine: &'static Routine,
        generator: Arc<dyn ContentGenerator>,
        activity: &ConstructionActivity,
        cancel: &CancellationToken,
    ) -> Result<Generated, BuildError> {
        // Validation errors surface before any generator call.
        let parameters = routine.resolve(activity)?;
        let request = GenerationRequest {
            activity_id: activity.id.clone(),
            kind: routine.kind,
            title: activity.title.clone(),
            description: activity.description.clone(),
            parameters,
        };

        tracing::debug!("Generating {} with {}", activity.id, generator.name());
        let output = tokio::select! {
            output = generator.generate(&request, cancel.child_token()) => output,
            _ = cancel.cancelled() => Err(GeneratorError::Cancelled),
        };

        let checked = output.and_then(|data| {
            routine
                .validate_output(&data)
                .map(|count| (data, count))
                .map_err(GeneratorError::InvalidOutput)
        });

        match checked {
            Ok((data, item_count)) => Ok(Generated {
                strategy: BuildStrategy::Generator,
                data,
                item_count,
                surface_keys: Vec::new(),
            }),
            Err(GeneratorError::Cancelled) => Err(BuildError::Cancelled),
            Err(err) => {
                tracing::warn!(
                    "{} failed for {}, using local fallback: {}",
                    generator.name(),
                    activity.id,
                    err
                );
                self.fallback(activity, &request.parameters)
            }
        }
    }

    async fn build_via_bridge(
        &self,
        activity: &ConstructionActivity,
        request_id: RequestId,
        cancel: &CancellationToken,
    ) -> Result<Generated, BuildError> {
        let wait = self.config.bridge_wait();
        let registered = tokio::select! {
            registered = self.bridge.wait_until_registered(wait) => registered,
            _ = cancel.cancelled() => return Err(BuildError::Cancelled),
        };
        if !registered {
            return Err(BuildError::BridgeUnavailable {
                waited_ms: self.config.bridge_wait_ms,
            });
        }

        let request = build_core::BuildRequest {
            activity_id: activity.id.clone(),
            activity_type: activity.activity_type.clone(),
            fields: form_data(activity),
            request_id,
        };
        let result = self
            .bridge
            .build_request_until(&request, cancel.clone())
            .await;
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        match result.result {
            Some(data) if result.success => Ok(Generated {
                strategy: BuildStrategy::Bridge,
                item_count: count_items(&data),
                data,
                surface_keys: result.storage_keys,
            }),
            _ => {
                let error = result.error.unwrap_or_else(|| "no payload".to_string());
                tracing::warn!(
                    "Bridge build of {} failed, using local fallback: {}",
                    activity.id,
                    error
                );
                self.fallback(activity, &request.fields)
            }
        }
    }

    fn fallback(
        &self,
        activity: &ConstructionActivity,
        params: &FieldMap,
    ) -> Result<Generated, BuildError> {
        let data = routine::placeholder(activity, params, self.config.fallback_item_count)?;
        Ok(Generated {
            strategy: BuildStrategy::Fallback,
            data,
            item_count: self.config.fallback_item_count,
            surface_keys: Vec::new(),
        })
    }

    /// Write the three artifact records and report which keys now exist.
    async fn persist(
        &self,
        activity: &ConstructionActivity,
        generated: &Generated,
        built_at: DateTime<Utc>,
    ) -> Result<Vec<String>, BuildError> {
        let envelope_key = constructed_key(&activity.activity_type, &activity.id);
        let metadata_key = activity_key(&activity.id);

        let envelope = ArtifactEnvelope {
            timestamp: built_at,
            ..ArtifactEnvelope::new(generated.data.clone(), generated.strategy)
        };
        self.store
            .put(&envelope_key, serde_json::to_value(&envelope).map_err(StoreError::from)?)
            .await?;

        let metadata = ActivityMetadata {
            generated_at: built_at,
            ..ActivityMetadata::describe(
                activity.title.clone(),
                activity.activity_type.clone(),
                activity.kind(),
                &generated.data,
                generated.item_count,
            )
        };
        self.store
            .put(&metadata_key, serde_json::to_value(&metadata).map_err(StoreError::from)?)
            .await?;

        self.update_index(activity, &generated.data, built_at).await?;

        let mut keys = generated.surface_keys.clone();
        for key in [&envelope_key, &metadata_key] {
            if self.store.get(key).await?.is_some() && !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        if self.load_index().await?.contains_key(&activity.id) {
            keys.push(index_entry_label(&activity.id));
        }
        Ok(keys)
    }

    async fn load_index(&self) -> Result<ConstructedIndex, StoreError> {
        let Some(raw) = self.store.get(CONSTRUCTED_INDEX_KEY).await? else {
            return Ok(ConstructedIndex::new());
        };
        match serde_json::from_value(raw) {
            Ok(index) => Ok(index),
            Err(err) => {
                tracing::warn!("Unreadable {}, starting a new one: {}", CONSTRUCTED_INDEX_KEY, err);
                Ok(ConstructedIndex::new())
            }
        }
    }

    async fn update_index(
        &self,
        activity: &ConstructionActivity,
        data: &Value,
        built_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.load_index().await?;
        index.insert(
            activity.id.clone(),
            ConstructedEntry {
                is_built: true,
                built_at,
                form_data: form_data(activity),
                generated_content: data.clone(),
            },
        );
        self.store
            .put(CONSTRUCTED_INDEX_KEY, serde_json::to_value(&index)?)
            .await
    }

    async fn forward_to_repository(&self, activity: &ConstructionActivity, data: &Value) {
        let Some(adapter) = &self.persistence else {
            return;
        };
        let artifact = NewArtifact {
            owner_id: self.owner_id.clone(),
            unique_code: format!("{}-{}", activity.activity_type, activity.id),
            activity_type: activity.activity_type.clone(),
            title: activity.title.clone(),
            description: activity.description.clone(),
            content: data.clone(),
        };
        match adapter.create_artifact(artifact).await {
            Ok(saved) => tracing::debug!("Artifact {} saved for {}", saved.id, activity.id),
            Err(err) => tracing::warn!(
                "Persisting artifact for {} failed, keeping local copy: {}",
                activity.id,
                err
            ),
        }
    }

    fn publish(&self, result: BuildResult) {
        if let Some(bus) = &self.bus {
            bus.publish(BuildEvent::BuildResult(result));
        }
    }
}

impl std::fmt::Debug for AutoBuildService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoBuildService")
            .field("bridge", &self.bridge)
            .field("generators", &self.generators)
            .field("persistence", &self.persistence.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// Custom fields plus the descriptive fields, as handed to the surface.
fn form_data(activity: &ConstructionActivity) -> FieldMap {
    let mut fields = activity.custom_fields.clone();
    fields
        .entry("title".to_string())
        .or_insert_with(|| activity.title.clone());
    fields
        .entry("description".to_string())
        .or_insert_with(|| activity.description.clone());
    fields
}

/// Length of the first list found in the payload, or 1.
fn count_items(data: &Value) -> usize {
    data.as_object()
        .and_then(|object| object.values().find_map(Value::as_array))
        .map_or(1, Vec::len)
}
