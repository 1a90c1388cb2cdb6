#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use build_core::{
    ActivityId, Artifact, ArtifactStore, BuildEvent, ConstructionActivity, EventName, FieldMap,
    NewArtifact, PersistenceAdapter, PersistenceError, QueueConfig, StoreFuture,
};
use chrono::Utc;
use orchestrator::{
    EventBus, GenerationHandle, GenerationOutput, HandleFuture, HandleResult, Subscription,
};
use parking_lot::Mutex;

pub fn activity(id: &str, title: &str) -> ConstructionActivity {
    ConstructionActivity::new(id, title, format!("Descrição de {title}"), "mapa-mental")
}

/// Queue config without the inter-item pause.
pub fn fast_config() -> QueueConfig {
    QueueConfig::default().with_delay(Duration::ZERO)
}

pub fn memory_store() -> Arc<dyn ArtifactStore> {
    Arc::new(storage::Storage::memory())
}

/// Records every bus event of the given names, in publish order.
pub struct EventLog {
    events: Arc<Mutex<Vec<BuildEvent>>>,
    subscriptions: Vec<Subscription>,
}

impl EventLog {
    pub fn attach(bus: &EventBus, names: &[EventName]) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let subscriptions = names
            .iter()
            .map(|name| {
                let events = Arc::clone(&events);
                bus.subscribe(*name, move |event| events.lock().push(event.clone()))
            })
            .collect();
        Self {
            events,
            subscriptions,
        }
    }

    pub fn events(&self) -> Vec<BuildEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<EventName> {
        self.events().iter().map(BuildEvent::name).collect()
    }

    /// Activity ids of the per-item outcome events.
    pub fn outcome_order(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    BuildEvent::ItemCompleted { .. } | BuildEvent::ItemError { .. }
                )
            })
            .filter_map(|event| event.activity_id().map(|id| id.to_string()))
            .collect()
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
    }
}

/// Surface that echoes the injected fields back as an artifact.
#[derive(Default)]
pub struct EchoHandle {
    pub(crate) open: AtomicBool,
    pub(crate) fields: Mutex<FieldMap>,
    pub(crate) current: Mutex<Option<ActivityId>>,
    pub(crate) builds: AtomicUsize,
    pub(crate) closes: AtomicUsize,
    pub fail_build: bool,
    /// The first `build` never finishes on its own.
    pub stall_first_build: bool,
}

impl EchoHandle {
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl GenerationHandle for EchoHandle {
    fn open<'a>(
        &'a self,
        activity_id: &'a ActivityId,
        _activity_type: &'a str,
        _fields: &'a FieldMap,
    ) -> HandleFuture<'a, HandleResult<()>> {
        Box::pin(async move {
            if self.open.swap(true, Ordering::SeqCst) {
                return Err("surface already open".to_string());
            }
            *self.current.lock() = Some(activity_id.clone());
            Ok(())
        })
    }

    fn set_fields<'a>(&'a self, fields: &'a FieldMap) -> HandleFuture<'a, HandleResult<()>> {
        Box::pin(async move {
            *self.fields.lock() = fields.clone();
            Ok(())
        })
    }

    fn build(&self) -> HandleFuture<'_, HandleResult<GenerationOutput>> {
        Box::pin(async move {
            let first = self.builds.fetch_add(1, Ordering::SeqCst) == 0;
            if first && self.stall_first_build {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail_build {
                return Err("surface rejected the fields".to_string());
            }
            let id = self
                .current
                .lock()
                .clone()
                .map(|id| id.to_string())
                .unwrap_or_default();
            let fields = self.fields.lock().clone();
            Ok(GenerationOutput {
                payload: serde_json::json!({
                    "id": id,
                    "items": fields.values().collect::<Vec<_>>(),
                }),
                storage_keys: vec![format!("surface_{id}")],
            })
        })
    }

    fn close(&self) -> HandleFuture<'_, ()> {
        Box::pin(async move {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.open.store(false, Ordering::SeqCst);
            *self.current.lock() = None;
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Repository double that keeps what it was given.
#[derive(Default)]
pub struct RecordingRepository {
    pub saved: Mutex<Vec<NewArtifact>>,
    pub fail: bool,
}

impl RecordingRepository {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn codes(&self) -> Vec<String> {
        self.saved
            .lock()
            .iter()
            .map(|artifact| artifact.unique_code.clone())
            .collect()
    }
}

impl PersistenceAdapter for RecordingRepository {
    fn create_artifact(
        &self,
        artifact: NewArtifact,
    ) -> StoreFuture<'_, Result<Artifact, PersistenceError>> {
        Box::pin(async move {
            if self.fail {
                return Err(PersistenceError::Backend("connection refused".to_string()));
            }
            self.saved.lock().push(artifact.clone());
            Ok(Artifact {
                id: artifact.unique_code.clone(),
                owner_id: artifact.owner_id,
                unique_code: artifact.unique_code,
                activity_type: artifact.activity_type,
                title: artifact.title,
                description: artifact.description,
                content: artifact.content,
                created_at: Utc::now(),
            })
        })
    }

    fn list_artifacts<'a>(
        &'a self,
        _owner_id: &'a str,
    ) -> StoreFuture<'a, Result<Vec<Artifact>, PersistenceError>> {
        Box::pin(async move { Ok(Vec::new()) })
    }
}
