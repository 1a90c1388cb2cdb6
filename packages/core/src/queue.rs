//! Build queue types: queued items, progress snapshots and run summaries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ConstructionActivity;

/// Build status of a single queued item within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemBuildStatus {
    #[default]
    Queued,
    Building,
    Completed,
    Failed,
    Skipped,
}

impl ItemBuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemBuildStatus::Queued => "queued",
            ItemBuildStatus::Building => "building",
            ItemBuildStatus::Completed => "completed",
            ItemBuildStatus::Failed => "failed",
            ItemBuildStatus::Skipped => "skipped",
        }
    }
}

/// An activity wrapped with queue metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedItem {
    pub activity: ConstructionActivity,
    /// 1-based position, fixed at enqueue time.
    pub position: usize,
    pub status: ItemBuildStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueuedItem {
    pub fn new(activity: ConstructionActivity, position: usize) -> Self {
        Self {
            activity,
            position,
            status: ItemBuildStatus::Queued,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Overall status of the build queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    /// Aborted or superseded.
    Error,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueStatus::Idle => write!(f, "idle"),
            QueueStatus::Running => write!(f, "running"),
            QueueStatus::Paused => write!(f, "paused"),
            QueueStatus::Completed => write!(f, "completed"),
            QueueStatus::Error => write!(f, "error"),
        }
    }
}

/// Per-outcome counters over a set of queued items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl OutcomeCounts {
    pub fn tally(items: &[QueuedItem]) -> Self {
        items.iter().fold(Self::default(), |mut acc, item| {
            match item.status {
                ItemBuildStatus::Completed => acc.completed += 1,
                ItemBuildStatus::Failed => acc.failed += 1,
                ItemBuildStatus::Skipped => acc.skipped += 1,
                ItemBuildStatus::Queued | ItemBuildStatus::Building => {}
            }
            acc
        })
    }
}

/// Snapshot emitted after every queue state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueProgress {
    pub status: QueueStatus,
    /// 1-based position of the cursor.
    pub current_position: usize,
    pub total_activities: usize,
    pub current_activity: Option<QueuedItem>,
    pub completed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
}

impl QueueProgress {
    /// Build a snapshot from the queue contents and cursor.
    pub fn snapshot(status: QueueStatus, items: &[QueuedItem], cursor: usize) -> Self {
        let counts = OutcomeCounts::tally(items);
        Self {
            status,
            current_position: cursor + 1,
            total_activities: items.len(),
            current_activity: items.get(cursor).cloned(),
            completed_count: counts.completed,
            failed_count: counts.failed,
            skipped_count: counts.skipped,
        }
    }

    /// Percentage of items that reached an outcome.
    pub fn percent_done(&self) -> Option<f64> {
        if self.total_activities == 0 {
            None
        } else {
            let done = self.completed_count + self.failed_count + self.skipped_count;
            Some(done as f64 / self.total_activities as f64 * 100.0)
        }
    }
}

/// Terminal report of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    pub run_id: u64,
    /// Status the run ended in: completed, paused or error.
    pub status: QueueStatus,
    pub total_activities: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub total_duration_ms: u64,
    pub activities: Vec<QueuedItem>,
}

impl QueueSummary {
    pub fn from_items(
        run_id: u64,
        status: QueueStatus,
        items: Vec<QueuedItem>,
        total_duration: Duration,
    ) -> Self {
        let counts = OutcomeCounts::tally(&items);
        Self {
            run_id,
            status,
            total_activities: items.len(),
            completed_count: counts.completed,
            failed_count: counts.failed,
            skipped_count: counts.skipped,
            total_duration_ms: total_duration.as_millis() as u64,
            activities: items,
        }
    }

    /// Every item reached an outcome.
    pub fn is_fully_accounted(&self) -> bool {
        self.completed_count + self.failed_count + self.skipped_count == self.total_activities
    }
}

/// Configuration for queue behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pause between two items, throttling the generation surface.
    pub delay_between_activities_ms: u64,
    /// Time budget for one build.
    pub timeout_ms: u64,
    /// Wait after aborting a running run before a superseding run starts.
    pub supersede_grace_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            delay_between_activities_ms: 800,
            timeout_ms: 120_000,
            supersede_grace_ms: 200,
        }
    }
}

impl QueueConfig {
    pub fn delay_between_activities(&self) -> Duration {
        Duration::from_millis(self.delay_between_activities_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn supersede_grace(&self) -> Duration {
        Duration::from_millis(self.supersede_grace_ms)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_between_activities_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_supersede_grace(mut self, grace: Duration) -> Self {
        self.supersede_grace_ms = grace.as_millis() as u64;
        self
    }
}
