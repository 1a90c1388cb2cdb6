//! Build lifecycle events and the request/result payloads carried by the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{ActivityId, FieldMap, QueueProgress, QueueSummary};

/// Correlation id for one build request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Ulid);

impl RequestId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable event names agreed between producers and consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "build.requested")]
    BuildRequested,
    #[serde(rename = "build.progress")]
    BuildProgress,
    #[serde(rename = "build.result")]
    BuildResult,
    #[serde(rename = "queue.progress")]
    QueueProgress,
    #[serde(rename = "queue.item.building")]
    ItemBuilding,
    #[serde(rename = "queue.item.completed")]
    ItemCompleted,
    #[serde(rename = "queue.item.error")]
    ItemError,
    #[serde(rename = "queue.completed")]
    QueueCompleted,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::BuildRequested => "build.requested",
            EventName::BuildProgress => "build.progress",
            EventName::BuildResult => "build.result",
            EventName::QueueProgress => "queue.progress",
            EventName::ItemBuilding => "queue.item.building",
            EventName::ItemCompleted => "queue.item.completed",
            EventName::ItemError => "queue.item.error",
            EventName::QueueCompleted => "queue.completed",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase reported while a generation surface builds an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Opening,
    Injecting,
    Started,
    Complete,
}

impl BuildPhase {
    /// Progress percentage conventionally attached to the phase.
    pub fn percent(&self) -> u8 {
        match self {
            BuildPhase::Opening => 25,
            BuildPhase::Injecting => 50,
            BuildPhase::Started => 75,
            BuildPhase::Complete => 100,
        }
    }
}

/// Request to build one activity through the generation surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub activity_id: ActivityId,
    pub activity_type: String,
    pub fields: FieldMap,
    pub request_id: RequestId,
}

impl BuildRequest {
    pub fn new(activity_id: ActivityId, activity_type: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            activity_id,
            activity_type: activity_type.into(),
            fields,
            request_id: RequestId::new(),
        }
    }
}

/// Progress report for an in-flight build request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildProgress {
    pub activity_id: ActivityId,
    pub request_id: RequestId,
    pub phase: BuildPhase,
    pub progress_percent: u8,
    pub message: String,
}

impl BuildProgress {
    pub fn new(
        activity_id: ActivityId,
        request_id: RequestId,
        phase: BuildPhase,
        message: impl Into<String>,
    ) -> Self {
        Self {
            activity_id,
            request_id,
            phase,
            progress_percent: phase.percent(),
            message: message.into(),
        }
    }
}

/// Outcome of a build request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub activity_id: ActivityId,
    pub request_id: RequestId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Where the artifact was persisted; diagnostics only.
    #[serde(default)]
    pub storage_keys: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl BuildResult {
    pub fn success(
        activity_id: ActivityId,
        request_id: RequestId,
        result: serde_json::Value,
        storage_keys: Vec<String>,
    ) -> Self {
        Self {
            activity_id,
            request_id,
            success: true,
            result: Some(result),
            error: None,
            storage_keys,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        activity_id: ActivityId,
        request_id: RequestId,
        error: impl Into<String>,
    ) -> Self {
        Self {
            activity_id,
            request_id,
            success: false,
            result: None,
            error: Some(error.into()),
            storage_keys: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Events published on the build event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum BuildEvent {
    #[serde(rename = "build.requested")]
    BuildRequested(BuildRequest),
    #[serde(rename = "build.progress")]
    BuildProgress(BuildProgress),
    #[serde(rename = "build.result")]
    BuildResult(BuildResult),
    #[serde(rename = "queue.progress")]
    QueueProgress(QueueProgress),
    #[serde(rename = "queue.item.building", rename_all = "camelCase")]
    ItemBuilding {
        activity_id: ActivityId,
        position: usize,
        total: usize,
    },
    #[serde(rename = "queue.item.completed", rename_all = "camelCase")]
    ItemCompleted {
        activity_id: ActivityId,
        position: usize,
        total: usize,
        success: bool,
    },
    #[serde(rename = "queue.item.error", rename_all = "camelCase")]
    ItemError {
        activity_id: ActivityId,
        position: usize,
        total: usize,
        error: String,
    },
    #[serde(rename = "queue.completed")]
    QueueCompleted(QueueSummary),
}

impl BuildEvent {
    pub fn name(&self) -> EventName {
        match self {
            BuildEvent::BuildRequested(_) => EventName::BuildRequested,
            BuildEvent::BuildProgress(_) => EventName::BuildProgress,
            BuildEvent::BuildResult(_) => EventName::BuildResult,
            BuildEvent::QueueProgress(_) => EventName::QueueProgress,
            BuildEvent::ItemBuilding { .. } => EventName::ItemBuilding,
            BuildEvent::ItemCompleted { .. } => EventName::ItemCompleted,
            BuildEvent::ItemError { .. } => EventName::ItemError,
            BuildEvent::QueueCompleted(_) => EventName::QueueCompleted,
        }
    }

    /// Get the activity ID associated with this event, if any.
    pub fn activity_id(&self) -> Option<&ActivityId> {
        match self {
            BuildEvent::BuildRequested(request) => Some(&request.activity_id),
            BuildEvent::BuildProgress(progress) => Some(&progress.activity_id),
            BuildEvent::BuildResult(result) => Some(&result.activity_id),
            BuildEvent::ItemBuilding { activity_id, .. }
            | BuildEvent::ItemCompleted { activity_id, .. }
            | BuildEvent::ItemError { activity_id, .. } => Some(activity_id),
            BuildEvent::QueueProgress(_) | BuildEvent::QueueCompleted(_) => None,
        }
    }

    /// Get the request ID associated with this event, if any.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            BuildEvent::BuildRequested(request) => Some(request.request_id),
            BuildEvent::BuildProgress(progress) => Some(progress.request_id),
            BuildEvent::BuildResult(result) => Some(result.request_id),
            _ => None,
        }
    }

    /// Whether the event is scoped to the given correlation id, matched
    /// against the request id first and the activity id second.
    pub fn matches_correlation(&self, correlation_id: &str) -> bool {
        let by_request = self
            .request_id()
            .is_some_and(|id| id.to_string() == correlation_id);
        by_request
            || self
                .activity_id()
                .is_some_and(|id| id.as_str() == correlation_id)
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            BuildEvent::BuildRequested(request) => format!(
                "Build requested for {} ({}) [{}]",
                request.activity_id, request.activity_type, request.request_id
            ),
            BuildEvent::BuildProgress(progress) => format!(
                "Build {} {:?} {}%: {}",
                progress.activity_id, progress.phase, progress.progress_percent, progress.message
            ),
            BuildEvent::BuildResult(result) => {
                if result.success {
                    format!("Build {} succeeded", result.activity_id)
                } else {
                    let error = result.error.as_deref().unwrap_or("no error message");
                    format!("Build {} failed: {}", result.activity_id, error)
                }
            }
            BuildEvent::QueueProgress(progress) => format!(
                "Queue {} at {}/{} ({} completed, {} failed, {} skipped)",
                progress.status,
                progress.current_position.min(progress.total_activities),
                progress.total_activities,
                progress.completed_count,
                progress.failed_count,
                progress.skipped_count
            ),
            BuildEvent::ItemBuilding {
                activity_id,
                position,
                total,
            } => format!("Item {}/{} building: {}", position, total, activity_id),
            BuildEvent::ItemCompleted {
                activity_id,
                position,
                total,
                ..
            } => format!("Item {}/{} completed: {}", position, total, activity_id),
            BuildEvent::ItemError {
                activity_id,
                position,
                total,
                error,
            } => format!("Item {}/{} failed: {}: {}", position, total, activity_id, error),
            BuildEvent::QueueCompleted(summary) => format!(
                "Run #{} finished: {}/{} completed in {}ms",
                summary.run_id,
                summary.completed_count,
                summary.total_activities,
                summary.total_duration_ms
            ),
        }
    }
}
