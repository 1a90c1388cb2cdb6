//! Bridge between the pipeline and the stateful generation surface.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use build_core::{ActivityId, BuildPhase, BuildProgress, BuildRequest, BuildResult, FieldMap};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;

/// Future type for generation handle operations.
pub type HandleFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type for generation handle operations.
pub type HandleResult<T> = Result<T, String>;

/// What the surface produced for one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub payload: serde_json::Value,
    /// Where the surface persisted the artifact, if it did.
    #[serde(default)]
    pub storage_keys: Vec<String>,
}

impl GenerationOutput {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            storage_keys: Vec::new(),
        }
    }
}

/// Capability object that drives one generation surface.
///
/// Implement this trait for whatever actually performs generation.
pub trait GenerationHandle: Send + Sync + 'static {
    /// Make the surface active for an activity.
    fn open<'a>(
        &'a self,
        activity_id: &'a ActivityId,
        activity_type: &'a str,
        fields: &'a FieldMap,
    ) -> HandleFuture<'a, HandleResult<()>>;

    /// Inject or overwrite parameters on the open surface.
    fn set_fields<'a>(&'a self, fields: &'a FieldMap) -> HandleFuture<'a, HandleResult<()>>;

    /// Run generation and wait for the surface to finish.
    fn build(&self) -> HandleFuture<'_, HandleResult<GenerationOutput>>;

    /// Deactivate the surface. Must be safe after a failed or skipped build.
    fn close(&self) -> HandleFuture<'_, ()>;

    fn is_open(&self) -> bool;

    /// Resolves once the opened surface has mounted.
    ///
    /// Surfaces without a readiness signal return `None` and the bridge waits
    /// the configured mount delay instead.
    fn ready(&self) -> Option<HandleFuture<'_, ()>> {
        None
    }
}

/// Bridge timing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Wait after `open` when the surface has no readiness signal.
    pub mount_delay_ms: u64,
    /// Wait between injecting fields and triggering the build.
    pub settle_delay_ms: u64,
    /// Upper bound on waiting for a readiness signal.
    pub ready_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mount_delay_ms: 150,
            settle_delay_ms: 100,
            ready_timeout_ms: 5_000,
        }
    }
}

impl BridgeConfig {
    pub fn mount_delay(&self) -> Duration {
        Duration::from_millis(self.mount_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

type SharedHandle = Arc<dyn GenerationHandle>;

struct BridgeInner {
    handle: watch::Sender<Option<SharedHandle>>,
    /// Held for the whole open..close sequence of one build.
    surface: Mutex<()>,
    config: BridgeConfig,
    bus: Option<EventBus>,
}

/// Registry holding at most one generation handle.
#[derive(Clone)]
pub struct GenerationBridge {
    inner: Arc<BridgeInner>,
}

impl GenerationBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self::build_inner(config, None)
    }

    /// Create a bridge that publishes `build.progress` phases on `bus`.
    pub fn with_bus(config: BridgeConfig, bus: EventBus) -> Self {
        Self::build_inner(config, Some(bus))
    }

    fn build_inner(config: BridgeConfig, bus: Option<EventBus>) -> Self {
        let (handle, _) = watch::channel(None);
        Self {
            inner: Arc::new(BridgeInner {
                handle,
                surface: Mutex::new(()),
                config,
                bus,
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Register the generation handle. A previously registered handle is
    /// replaced; the last registration wins.
    pub fn register(&self, handle: Arc<dyn GenerationHandle>) {
        let previous = self.inner.handle.send_replace(Some(handle));
        if previous.is_some() {
            tracing::warn!("Generation handle replaced by a new registration");
        } else {
            tracing::info!("Generation handle registered");
        }
    }

    pub fn unregister(&self) {
        if self.inner.handle.send_replace(None).is_some() {
            tracing::info!("Generation handle unregistered");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.handle.borrow().is_some()
    }

    fn current(&self) -> Option<SharedHandle> {
        self.inner.handle.borrow().clone()
    }

    /// Wait up to `timeout` for a handle to be registered.
    pub async fn wait_until_registered(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.handle.subscribe();
        let registered = async move { rx.wait_for(Option::is_some).await.is_ok() };
        matches!(tokio::time::timeout(timeout, registered).await, Ok(true))
    }

    /// Build one activity through the registered surface.
    pub async fn build_activity(
        &self,
        activity_id: &ActivityId,
        activity_type: &str,
        fields: &FieldMap,
    ) -> BuildResult {
        let request = BuildRequest::new(activity_id.clone(), activity_type, fields.clone());
        self.build_request(&request).await
    }

    /// Build a request through the registered surface.
    ///
    /// Never fails: every error becomes a failed [`BuildResult`]. `close` is
    /// attempted whenever the handle was touched.
    pub async fn build_request(&self, request: &BuildRequest) -> BuildResult {
        self.build_request_until(request, CancellationToken::new()).await
    }

    /// Like [`build_request`](Self::build_request), but stops when `cancel`
    /// fires or when the returned future is dropped.
    ///
    /// The surface sequence runs on its own task, so `close` still happens
    /// after the caller gives up; the surface stays locked until it has.
    pub async fn build_request_until(
        &self,
        request: &BuildRequest,
        cancel: CancellationToken,
    ) -> BuildResult {
        let cancel = cancel.child_token();
        let _abandon = cancel.clone().drop_guard();

        let bridge = self.clone();
        let owned = request.clone();
        let task = tokio::spawn(async move { bridge.run_sequence(&owned, cancel).await });

        match task.await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!("Bridge task for {} failed: {}", request.activity_id, err);
                BuildResult::failure(
                    request.activity_id.clone(),
                    request.request_id,
                    format!("Generation task failed: {err}"),
                )
            }
        }
    }

    async fn run_sequence(&self, request: &BuildRequest, cancel: CancellationToken) -> BuildResult {
        let _surface = tokio::select! {
            guard = self.inner.surface.lock() => guard,
            _ = cancel.cancelled() => return cancelled(request),
        };

        let Some(handle) = self.current() else {
            tracing::warn!(
                "Build of {} requested but no generation handle is registered",
                request.activity_id
            );
            return BuildResult::failure(
                request.activity_id.clone(),
                request.request_id,
                "Generation bridge not registered",
            );
        };

        let outcome = tokio::select! {
            outcome = self.drive(handle.as_ref(), request) => Some(outcome),
            _ = cancel.cancelled() => None,
        };
        handle.close().await;

        match outcome {
            Some(Ok(output)) => {
                self.report(request, BuildPhase::Complete, "Generation complete");
                tracing::info!("Bridge built {}", request.activity_id);
                BuildResult::success(
                    request.activity_id.clone(),
                    request.request_id,
                    output.payload,
                    output.storage_keys,
                )
            }
            Some(Err(error)) => {
                tracing::warn!("Bridge build of {} failed: {}", request.activity_id, error);
                BuildResult::failure(request.activity_id.clone(), request.request_id, error)
            }
            None => {
                tracing::info!("Bridge build of {} cancelled, surface closed", request.activity_id);
                cancelled(request)
            }
        }
    }

    async fn drive(
        &self,
        handle: &dyn GenerationHandle,
        request: &BuildRequest,
    ) -> HandleResult<GenerationOutput> {
        self.report(request, BuildPhase::Opening, "Opening generation surface");
        handle
            .open(&request.activity_id, &request.activity_type, &request.fields)
            .await?;
        self.await_mount(handle).await?;

        self.report(request, BuildPhase::Injecting, "Injecting fields");
        handle.set_fields(&request.fields).await?;
        tokio::time::sleep(self.inner.config.settle_delay()).await;

        self.report(request, BuildPhase::Started, "Generation started");
        handle.build().await
    }

    async fn await_mount(&self, handle: &dyn GenerationHandle) -> HandleResult<()> {
        match handle.ready() {
            Some(ready) => tokio::time::timeout(self.inner.config.ready_timeout(), ready)
                .await
                .map_err(|_| "Generation surface did not report ready".to_string()),
            None => {
                tokio::time::sleep(self.inner.config.mount_delay()).await;
                Ok(())
            }
        }
    }

    fn report(&self, request: &BuildRequest, phase: BuildPhase, message: &str) {
        tracing::debug!("{} {:?}: {}", request.activity_id, phase, message);
        if let Some(bus) = &self.inner.bus {
            bus.publish(build_core::BuildEvent::BuildProgress(BuildProgress::new(
                request.activity_id.clone(),
                request.request_id,
                phase,
                message,
            )));
        }
    }
}

fn cancelled(request: &BuildRequest) -> BuildResult {
    BuildResult::failure(
        request.activity_id.clone(),
        request.request_id,
        "Generation cancelled",
    )
}

impl Default for GenerationBridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl std::fmt::Debug for GenerationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationBridge")
            .field("ready", &self.is_ready())
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use build_core::{BuildEvent, EventName};
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingHandle {
        calls: SyncMutex<Vec<String>>,
        open: AtomicBool,
        fail_open: bool,
        fail_build: bool,
        signals_ready: bool,
    }

    impl RecordingHandle {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().push(call.into());
        }
    }

    impl GenerationHandle for RecordingHandle {
        fn open<'a>(
            &'a self,
            activity_id: &'a ActivityId,
            _activity_type: &'a str,
            _fields: &'a FieldMap,
        ) -> HandleFuture<'a, HandleResult<()>> {
            Box::pin(async move {
                self.record(format!("open:{activity_id}"));
                if self.fail_open {
                    return Err("surface crashed".to_string());
                }
                self.open.store(true, Ordering::SeqCst);
                Ok(())
            })
        }

        fn set_fields<'a>(&'a self, fields: &'a FieldMap) -> HandleFuture<'a, HandleResult<()>> {
            Box::pin(async move {
                self.record(format!("set_fields:{}", fields.len()));
                Ok(())
            })
        }

        fn build(&self) -> HandleFuture<'_, HandleResult<GenerationOutput>> {
            Box::pin(async move {
                self.record("build");
                if self.fail_build {
                    Err("generation failed".to_string())
                } else {
                    Ok(GenerationOutput {
                        payload: serde_json::json!({"title": "built"}),
                        storage_keys: vec!["surface_key".to_string()],
                    })
                }
            })
        }

        fn close(&self) -> HandleFuture<'_, ()> {
            Box::pin(async move {
                self.record("close");
                self.open.store(false, Ordering::SeqCst);
            })
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn ready(&self) -> Option<HandleFuture<'_, ()>> {
            if !self.signals_ready {
                return None;
            }
            Some(Box::pin(async move { self.record("ready") }))
        }
    }

    fn fields() -> FieldMap {
        FieldMap::from([("tema".to_string(), "Frações".to_string())])
    }

    #[tokio::test]
    async fn unregistered_bridge_fails_immediately() {
        let bridge = GenerationBridge::default();
        assert!(!bridge.is_ready());
        let result = bridge
            .build_activity(&"a".into(), "mapa-mental", &fields())
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Generation bridge not registered"));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_build_runs_every_step_in_order() {
        let bridge = GenerationBridge::default();
        let handle = Arc::new(RecordingHandle::default());
        bridge.register(handle.clone());

        let result = bridge
            .build_activity(&"a".into(), "mapa-mental", &fields())
            .await;

        assert!(result.success);
        assert_eq!(result.storage_keys, vec!["surface_key".to_string()]);
        assert_eq!(handle.calls(), vec!["open:a", "set_fields:1", "build", "close"]);
        assert!(!handle.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_build_still_closes_the_surface() {
        let bridge = GenerationBridge::default();
        let handle = Arc::new(RecordingHandle {
            fail_build: true,
            ..Default::default()
        });
        bridge.register(handle.clone());

        let result = bridge
            .build_activity(&"a".into(), "mapa-mental", &fields())
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("generation failed"));
        assert_eq!(handle.calls().last().map(String::as_str), Some("close"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_open_skips_injection_but_closes() {
        let bridge = GenerationBridge::default();
        let handle = Arc::new(RecordingHandle {
            fail_open: true,
            ..Default::default()
        });
        bridge.register(handle.clone());

        let result = bridge
            .build_activity(&"a".into(), "mapa-mental", &fields())
            .await;

        assert!(!result.success);
        assert_eq!(handle.calls(), vec!["open:a", "close"]);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_signal_replaces_mount_delay() {
        let bridge = GenerationBridge::default();
        let handle = Arc::new(RecordingHandle {
            signals_ready: true,
            ..Default::default()
        });
        bridge.register(handle.clone());

        bridge
            .build_activity(&"a".into(), "mapa-mental", &fields())
            .await;

        assert_eq!(
            handle.calls(),
            vec!["open:a", "ready", "set_fields:1", "build", "close"]
        );
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let bridge = GenerationBridge::new(BridgeConfig {
            mount_delay_ms: 0,
            settle_delay_ms: 0,
            ..Default::default()
        });
        let first = Arc::new(RecordingHandle::default());
        let second = Arc::new(RecordingHandle::default());
        bridge.register(first.clone());
        bridge.register(second.clone());

        bridge.build_activity(&"a".into(), "x", &fields()).await;

        assert!(first.calls().is_empty());
        assert_eq!(second.calls().len(), 4);

        bridge.unregister();
        assert!(!bridge.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_registered_is_bounded() {
        let bridge = GenerationBridge::default();
        assert!(!bridge.wait_until_registered(Duration::from_secs(5)).await);

        let late = bridge.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            late.register(Arc::new(RecordingHandle::default()));
        });
        assert!(bridge.wait_until_registered(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_phases_are_published_in_order() {
        let bus = EventBus::default();
        let phases = Arc::new(SyncMutex::new(Vec::new()));
        let seen = Arc::clone(&phases);
        let _sub = bus.subscribe(EventName::BuildProgress, move |event| {
            if let BuildEvent::BuildProgress(progress) = event {
                seen.lock().push(progress.progress_percent);
            }
        });

        let bridge = GenerationBridge::with_bus(BridgeConfig::default(), bus);
        bridge.register(Arc::new(RecordingHandle::default()));
        bridge
            .build_activity(&"a".into(), "mapa-mental", &fields())
            .await;

        assert_eq!(*phases.lock(), vec![25, 50, 75, 100]);
    }
}
