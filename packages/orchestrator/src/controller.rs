//! Sequential build queue controller.
//!
//! One run drains the queue in enqueue order, building at most one activity
//! at a time. A run stays authoritative only while it is the active run:
//! `abort`, `init_queue`, `reset` and a superseding `start` retire it, and
//! whatever it produces afterwards is discarded.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use build_core::{
    BuildError, BuildEvent, ConstructionActivity, ItemBuildStatus, QueueConfig, QueueError,
    QueueProgress, QueueStatus, QueueSummary, QueuedItem,
};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;

/// Future returned by a build function.
pub type BuildFuture = Pin<Box<dyn Future<Output = Result<bool, BuildError>> + Send>>;

/// Per-activity build strategy injected into the controller.
///
/// The token is cancelled when the run is aborted or superseded and when the
/// build exceeds its time budget.
pub type BuildFn = Arc<dyn Fn(ConstructionActivity, CancellationToken) -> BuildFuture + Send + Sync>;

type ProgressHook = Arc<dyn Fn(&QueueProgress) + Send + Sync>;
type ItemHook = Arc<dyn Fn(&QueuedItem) + Send + Sync>;
type ItemOutcomeHook = Arc<dyn Fn(&QueuedItem, bool) + Send + Sync>;
type SummaryHook = Arc<dyn Fn(&QueueSummary) + Send + Sync>;

/// In-process callbacks, invoked alongside the bus events.
#[derive(Clone, Default)]
pub struct ControllerHooks {
    pub on_progress: Option<ProgressHook>,
    pub on_activity_start: Option<ItemHook>,
    pub on_activity_complete: Option<ItemOutcomeHook>,
    pub on_queue_complete: Option<SummaryHook>,
}

impl ControllerHooks {
    pub fn on_progress(mut self, hook: impl Fn(&QueueProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(hook));
        self
    }

    pub fn on_activity_start(mut self, hook: impl Fn(&QueuedItem) + Send + Sync + 'static) -> Self {
        self.on_activity_start = Some(Arc::new(hook));
        self
    }

    pub fn on_activity_complete(
        mut self,
        hook: impl Fn(&QueuedItem, bool) + Send + Sync + 'static,
    ) -> Self {
        self.on_activity_complete = Some(Arc::new(hook));
        self
    }

    pub fn on_queue_complete(
        mut self,
        hook: impl Fn(&QueueSummary) + Send + Sync + 'static,
    ) -> Self {
        self.on_queue_complete = Some(Arc::new(hook));
        self
    }
}

struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
    done: watch::Receiver<Option<QueueSummary>>,
}

struct QueueState {
    items: Vec<QueuedItem>,
    cursor: usize,
    status: QueueStatus,
    run_counter: u64,
    /// Bumped by every `start` call; only the latest call may launch.
    start_ticket: u64,
    active_run: Option<ActiveRun>,
    config: QueueConfig,
    build_fn: Option<BuildFn>,
    hooks: ControllerHooks,
}

impl QueueState {
    fn is_current(&self, run_id: u64) -> bool {
        self.active_run.as_ref().is_some_and(|run| run.id == run_id)
    }

    /// Retire the active run and fail its in-flight item.
    fn retire_active_run(&mut self, reason: &str) -> Option<u64> {
        let run = self.active_run.take()?;
        run.cancel.cancel();
        let now = Utc::now();
        for item in self
            .items
            .iter_mut()
            .filter(|item| item.status == ItemBuildStatus::Building)
        {
            item.status = ItemBuildStatus::Failed;
            item.error = Some(reason.to_string());
            item.completed_at = Some(now);
            item.activity.mark_error();
        }
        Some(run.id)
    }

    fn replace_items(&mut self, activities: Vec<ConstructionActivity>) {
        self.items = activities
            .into_iter()
            .enumerate()
            .map(|(index, activity)| QueuedItem::new(activity, index + 1))
            .collect();
        self.cursor = 0;
    }

    fn progress(&self) -> QueueProgress {
        QueueProgress::snapshot(self.status, &self.items, self.cursor)
    }
}

enum Launch {
    Fresh(RunContext),
    Join(watch::Receiver<Option<QueueSummary>>),
    /// A later `start` took over while this one waited out the grace period.
    Stale(Vec<QueuedItem>),
}

struct RunContext {
    id: u64,
    cancel: CancellationToken,
    build_fn: BuildFn,
    config: QueueConfig,
    done: watch::Sender<Option<QueueSummary>>,
}

enum RunEnd {
    Continue,
    Completed(Vec<QueuedItem>),
    Paused(Vec<QueuedItem>),
    Retired,
}

struct ControllerInner {
    state: Mutex<QueueState>,
    bus: Option<EventBus>,
}

/// Scheduler that builds queued activities one at a time.
#[derive(Clone)]
pub struct BuildQueueController {
    inner: Arc<ControllerInner>,
}

impl BuildQueueController {
    pub fn new(config: QueueConfig) -> Self {
        Self::build_inner(config, None)
    }

    /// Create a controller that also publishes its events on `bus`.
    pub fn with_bus(config: QueueConfig, bus: EventBus) -> Self {
        Self::build_inner(config, Some(bus))
    }

    fn build_inner(config: QueueConfig, bus: Option<EventBus>) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                state: Mutex::new(QueueState {
                    items: Vec::new(),
                    cursor: 0,
                    status: QueueStatus::Idle,
                    run_counter: 0,
                    start_ticket: 0,
                    active_run: None,
                    config,
                    build_fn: None,
                    hooks: ControllerHooks::default(),
                }),
                bus,
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut QueueState) -> R) -> R {
        let mut state = self.inner.state.lock();
        f(&mut state)
    }

    /// Run `f` only while `run_id` is still the active run.
    fn apply<R>(&self, run_id: u64, f: impl FnOnce(&mut QueueState) -> Option<R>) -> Option<R> {
        self.with_state(|state| {
            if state.is_current(run_id) {
                f(state)
            } else {
                None
            }
        })
    }

    /// Replace the queue with one queued item per activity, in input order.
    pub fn init_queue(&self, activities: Vec<ConstructionActivity>) {
        let (count, retired) = self.with_state(|state| {
            let retired = state.retire_active_run("Queue replaced");
            state.replace_items(activities);
            state.status = QueueStatus::Idle;
            (state.items.len(), retired)
        });
        if let Some(run_id) = retired {
            tracing::warn!("Run #{} retired by queue replacement", run_id);
        }
        tracing::info!("Queue initialized with {} activities", count);
        self.emit_progress();
    }

    pub fn set_build_function<F>(&self, build_fn: F)
    where
        F: Fn(ConstructionActivity, CancellationToken) -> BuildFuture + Send + Sync + 'static,
    {
        self.with_state(|state| state.build_fn = Some(Arc::new(build_fn)));
    }

    pub fn set_hooks(&self, hooks: ControllerHooks) {
        self.with_state(|state| state.hooks = hooks);
    }

    /// Replace the configuration used by subsequent runs.
    pub fn update_config(&self, config: QueueConfig) {
        self.with_state(|state| state.config = config);
    }

    pub fn config(&self) -> QueueConfig {
        self.with_state(|state| state.config.clone())
    }

    pub fn status(&self) -> QueueStatus {
        self.with_state(|state| state.status)
    }

    pub fn is_running(&self) -> bool {
        self.status() == QueueStatus::Running
    }

    /// The item under the cursor.
    pub fn current_activity(&self) -> Option<QueuedItem> {
        self.with_state(|state| state.items.get(state.cursor).cloned())
    }

    pub fn progress(&self) -> QueueProgress {
        self.with_state(|state| state.progress())
    }

    pub fn items(&self) -> Vec<QueuedItem> {
        self.with_state(|state| state.items.clone())
    }

    /// Drain the queue and return the run summary.
    ///
    /// Starting while a run is active retires that run first. Starting while
    /// paused continues from the saved cursor.
    pub async fn start(&self) -> Result<QueueSummary, QueueError> {
        let (ticket, superseded) = self.with_state(|state| {
            if state.build_fn.is_none() {
                return Err(QueueError::MissingBuildFunction);
            }
            state.start_ticket += 1;
            let ticket = state.start_ticket;
            if state.status == QueueStatus::Running {
                let retired = state.retire_active_run("Superseded by a new run");
                if retired.is_some() {
                    state.status = QueueStatus::Error;
                }
                return Ok((ticket, retired.map(|id| (id, state.config.supersede_grace()))));
            }
            Ok((ticket, None))
        })?;

        if let Some((run_id, grace)) = superseded {
            tracing::warn!("Run #{} superseded by a new start", run_id);
            self.emit_progress();
            tokio::time::sleep(grace).await;
        }

        let launch = self.with_state(|state| Self::prepare_launch(state, ticket))?;

        match launch {
            Launch::Fresh(ctx) => {
                self.emit_progress();
                Ok(self.run(ctx).await)
            }
            Launch::Join(done) => {
                self.emit_progress();
                Ok(self.wait_for_run(done).await)
            }
            Launch::Stale(items) => {
                let run_id = superseded.map_or(0, |(run_id, _)| run_id);
                tracing::info!("Start after run #{} dropped in favour of a later one", run_id);
                Ok(QueueSummary::from_items(
                    run_id,
                    QueueStatus::Error,
                    items,
                    std::time::Duration::ZERO,
                ))
            }
        }
    }

    fn prepare_launch(state: &mut QueueState, ticket: u64) -> Result<Launch, QueueError> {
        let build_fn = state
            .build_fn
            .clone()
            .ok_or(QueueError::MissingBuildFunction)?;

        // The last start request wins; earlier ones leave the newer run alone.
        if ticket != state.start_ticket {
            return Ok(Launch::Stale(state.items.clone()));
        }

        if state.status == QueueStatus::Paused {
            if let Some(run) = &state.active_run {
                // The paused run is still finishing its in-flight item; let it carry on.
                tracing::info!("Resuming run #{}", run.id);
                let done = run.done.clone();
                state.status = QueueStatus::Running;
                return Ok(Launch::Join(done));
            }
        }

        if let Some(run_id) = state.retire_active_run("Superseded by a new run") {
            tracing::warn!("Run #{} superseded by a new start", run_id);
        }

        if matches!(state.status, QueueStatus::Completed | QueueStatus::Error) {
            let activities = state.items.drain(..).map(|item| item.activity).collect();
            state.replace_items(activities);
        }

        state.run_counter += 1;
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        state.active_run = Some(ActiveRun {
            id: state.run_counter,
            cancel: cancel.clone(),
            done: done_rx,
        });
        state.status = QueueStatus::Running;

        Ok(Launch::Fresh(RunContext {
            id: state.run_counter,
            cancel,
            build_fn,
            config: state.config.clone(),
            done: done_tx,
        }))
    }

    /// Stop dequeuing after the in-flight item. Returns whether it applied.
    pub fn pause(&self) -> bool {
        let paused = self.with_state(|state| {
            if state.status != QueueStatus::Running {
                return false;
            }
            state.status = QueueStatus::Paused;
            true
        });
        if paused {
            tracing::info!("Queue paused");
            self.emit_progress();
        }
        paused
    }

    /// Continue a paused queue from its saved cursor.
    pub async fn resume(&self) -> Result<QueueSummary, QueueError> {
        let status = self.status();
        if status != QueueStatus::Paused {
            return Err(QueueError::InvalidState {
                operation: "resume",
                status,
            });
        }
        self.start().await
    }

    /// Retire the active run. In-flight work is told to stop and its result
    /// is discarded. Returns whether it applied.
    pub fn abort(&self) -> bool {
        let aborted = self.with_state(|state| {
            if !matches!(state.status, QueueStatus::Running | QueueStatus::Paused) {
                return None;
            }
            state.status = QueueStatus::Error;
            Some(state.retire_active_run("Run aborted"))
        });
        match aborted {
            Some(run_id) => {
                tracing::warn!("Queue aborted (run {:?})", run_id);
                self.emit_progress();
                true
            }
            None => false,
        }
    }

    /// Clear the queue and return to idle.
    pub fn reset(&self) {
        self.with_state(|state| {
            state.retire_active_run("Queue reset");
            state.items.clear();
            state.cursor = 0;
            state.status = QueueStatus::Idle;
        });
        tracing::info!("Queue reset");
        self.emit_progress();
    }

    async fn run(&self, ctx: RunContext) -> QueueSummary {
        let started = Instant::now();
        let mut snapshot = self.items();
        tracing::info!("Run #{} started with {} activities", ctx.id, snapshot.len());

        let summary = loop {
            self.drain(&ctx, &mut snapshot).await;

            let end = self.with_state(|state| {
                if !state.is_current(ctx.id) {
                    return RunEnd::Retired;
                }
                match state.status {
                    QueueStatus::Running if state.cursor < state.items.len() => RunEnd::Continue,
                    QueueStatus::Running => {
                        state.status = QueueStatus::Completed;
                        state.active_run = None;
                        RunEnd::Completed(state.items.clone())
                    }
                    QueueStatus::Paused => {
                        state.active_run = None;
                        RunEnd::Paused(state.items.clone())
                    }
                    _ => {
                        state.active_run = None;
                        RunEnd::Retired
                    }
                }
            });

            let elapsed = started.elapsed();
            match end {
                RunEnd::Continue => continue,
                RunEnd::Completed(items) => {
                    let summary =
                        QueueSummary::from_items(ctx.id, QueueStatus::Completed, items, elapsed);
                    tracing::info!(
                        "Run #{} completed: {} completed, {} failed, {} skipped in {}ms",
                        ctx.id,
                        summary.completed_count,
                        summary.failed_count,
                        summary.skipped_count,
                        summary.total_duration_ms
                    );
                    self.emit_progress();
                    if let Some(hook) = self.with_state(|state| state.hooks.on_queue_complete.clone()) {
                        hook(&summary);
                    }
                    self.publish(BuildEvent::QueueCompleted(summary.clone()));
                    break summary;
                }
                RunEnd::Paused(items) => {
                    tracing::info!("Run #{} paused", ctx.id);
                    break QueueSummary::from_items(ctx.id, QueueStatus::Paused, items, elapsed);
                }
                RunEnd::Retired => {
                    tracing::warn!("Run #{} ended without completing", ctx.id);
                    break QueueSummary::from_items(
                        ctx.id,
                        QueueStatus::Error,
                        std::mem::take(&mut snapshot),
                        elapsed,
                    );
                }
            }
        };

        ctx.done.send_replace(Some(summary.clone()));
        summary
    }

    async fn drain(&self, ctx: &RunContext, snapshot: &mut Vec<QueuedItem>) {
        loop {
            let next = self.apply(ctx.id, |state| {
                if state.status != QueueStatus::Running {
                    return None;
                }
                let index = state.cursor;
                state
                    .items
                    .get(index)
                    .map(|item| (index, item.clone(), state.items.len()))
            });
            let Some((index, item, total)) = next else {
                return;
            };

            let activity_id = item.activity.id.clone();
            if !self.process(ctx, index, item, total).await {
                // Prefer the record the retiring call left behind.
                let retired = self.with_state(|state| {
                    state
                        .items
                        .get(index)
                        .filter(|item| {
                            item.activity.id == activity_id
                                && item.status == ItemBuildStatus::Failed
                        })
                        .cloned()
                });
                if let Some(orphan) = snapshot.get_mut(index) {
                    match retired {
                        Some(item) => *orphan = item,
                        None => {
                            orphan.status = ItemBuildStatus::Failed;
                            orphan.error = Some("Run aborted".to_string());
                        }
                    }
                }
                return;
            }

            let more = self.apply(ctx.id, |state| {
                *snapshot = state.items.clone();
                Some(state.status == QueueStatus::Running && state.cursor < state.items.len())
            });
            if more != Some(true) {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(ctx.config.delay_between_activities()) => {}
                _ = ctx.cancel.cancelled() => return,
            }
        }
    }

    /// Process one item. Returns false when the run was retired meanwhile.
    async fn process(
        &self,
        ctx: &RunContext,
        index: usize,
        item: QueuedItem,
        total: usize,
    ) -> bool {
        let position = item.position;
        let activity_id = item.activity.id.clone();

        if item.activity.is_already_built() {
            let skipped = self.apply(ctx.id, |state| {
                let item = state.items.get_mut(index)?;
                item.status = ItemBuildStatus::Skipped;
                item.completed_at = Some(Utc::now());
                state.cursor = index + 1;
                Some(())
            });
            if skipped.is_some() {
                tracing::info!("Skipping {} ({}/{}): already built", activity_id, position, total);
                self.emit_progress();
            }
            return skipped.is_some();
        }

        let missing = item.activity.missing_required_fields();
        if !missing.is_empty() {
            let error = BuildError::validation(missing).to_string();
            return self.finish_item(ctx.id, index, total, Err(error));
        }

        let building = self.apply(ctx.id, |state| {
            let item = state.items.get_mut(index)?;
            item.status = ItemBuildStatus::Building;
            item.started_at = Some(Utc::now());
            item.activity.mark_in_progress(10);
            Some(item.clone())
        });
        let Some(building) = building else {
            return false;
        };

        tracing::info!("Building {} ({}/{})", activity_id, position, total);
        self.publish(BuildEvent::ItemBuilding {
            activity_id: activity_id.clone(),
            position,
            total,
        });
        if let Some(hook) = self.with_state(|state| state.hooks.on_activity_start.clone()) {
            hook(&building);
        }
        self.emit_progress();

        self.apply(ctx.id, |state| {
            state.items.get_mut(index)?.activity.mark_in_progress(50);
            Some(())
        });

        let token = ctx.cancel.child_token();
        let build = (ctx.build_fn)(building.activity, token.clone());
        let outcome = match tokio::time::timeout(ctx.config.timeout(), build).await {
            Ok(outcome) => outcome,
            Err(_) => {
                token.cancel();
                Err(BuildError::Timeout(ctx.config.timeout_ms))
            }
        };

        let outcome = match outcome {
            Ok(true) => Ok(()),
            Ok(false) => Err("Build function reported failure".to_string()),
            Err(err) => Err(err.to_string()),
        };
        self.finish_item(ctx.id, index, total, outcome)
    }

    fn finish_item(
        &self,
        run_id: u64,
        index: usize,
        total: usize,
        outcome: Result<(), String>,
    ) -> bool {
        let finished = self.apply(run_id, |state| {
            let item = state.items.get_mut(index)?;
            let now = Utc::now();
            item.completed_at = Some(now);
            match &outcome {
                Ok(()) => {
                    item.status = ItemBuildStatus::Completed;
                    item.error = None;
                    item.activity.mark_built(now);
                }
                Err(error) => {
                    item.status = ItemBuildStatus::Failed;
                    item.error = Some(error.clone());
                    item.activity.mark_error();
                }
            }
            state.cursor = index + 1;
            Some((item.clone(), state.hooks.on_activity_complete.clone()))
        });

        let Some((item, hook)) = finished else {
            tracing::debug!("Discarding result of item {} from a retired run", index + 1);
            return false;
        };

        let activity_id = item.activity.id.clone();
        match &outcome {
            Ok(()) => {
                tracing::info!("Built {} ({}/{})", activity_id, item.position, total);
                self.publish(BuildEvent::ItemCompleted {
                    activity_id,
                    position: item.position,
                    total,
                    success: true,
                });
            }
            Err(error) => {
                tracing::error!("Failed {} ({}/{}): {}", activity_id, item.position, total, error);
                self.publish(BuildEvent::ItemError {
                    activity_id,
                    position: item.position,
                    total,
                    error: error.clone(),
                });
            }
        }
        if let Some(hook) = hook {
            hook(&item, outcome.is_ok());
        }
        self.emit_progress();
        true
    }

    async fn wait_for_run(&self, mut done: watch::Receiver<Option<QueueSummary>>) -> QueueSummary {
        let finished = match done.wait_for(Option::is_some).await {
            Ok(summary) => summary.clone(),
            Err(_) => None,
        };
        finished.unwrap_or_else(|| {
            self.with_state(|state| {
                QueueSummary::from_items(
                    state.run_counter,
                    state.status,
                    state.items.clone(),
                    std::time::Duration::ZERO,
                )
            })
        })
    }

    /// Recompute progress and send it to the hook and the bus.
    fn emit_progress(&self) {
        let (progress, hook) = self.with_state(|state| (state.progress(), state.hooks.on_progress.clone()));
        if let Some(hook) = hook {
            hook(&progress);
        }
        self.publish(BuildEvent::QueueProgress(progress));
    }

    fn publish(&self, event: BuildEvent) {
        if let Some(bus) = &self.inner.bus {
            bus.publish(event);
        }
    }
}

impl Default for BuildQueueController {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl std::fmt::Debug for BuildQueueController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let progress = self.progress();
        f.debug_struct("BuildQueueController")
            .field("status", &progress.status)
            .field("position", &progress.current_position)
            .field("total", &progress.total_activities)
            .finish()
    }
}
