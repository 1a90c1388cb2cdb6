//! Construction activity domain types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form parameters supplied by the user for an activity.
pub type FieldMap = BTreeMap<String, String>;

/// Stable identifier for an activity, supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(pub String);

impl ActivityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActivityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActivityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ActivityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle status of an activity as seen by its owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Error,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Pending => "pending",
            ActivityStatus::InProgress => "in_progress",
            ActivityStatus::Completed => "completed",
            ActivityStatus::Error => "error",
        }
    }
}

/// Closed set of activity kinds with a dedicated generation routine.
///
/// Any declared type that is not recognised maps to [`ActivityKind::Generic`],
/// which is built through the generation bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityKind {
    QuadroInterativo,
    Quiz,
    FlashCards,
    TeseRedacao,
    Generic,
}

impl ActivityKind {
    /// All kinds that have a type-specific routine.
    pub const SPECIFIC: [ActivityKind; 4] = [
        ActivityKind::QuadroInterativo,
        ActivityKind::Quiz,
        ActivityKind::FlashCards,
        ActivityKind::TeseRedacao,
    ];

    /// Resolve a declared activity type string.
    pub fn from_declared(declared: &str) -> Self {
        match declared.trim().to_ascii_lowercase().as_str() {
            "quadro-interativo" | "quadro_interativo" => ActivityKind::QuadroInterativo,
            "quiz-interativo" | "quiz" => ActivityKind::Quiz,
            "flash-cards" | "flashcards" => ActivityKind::FlashCards,
            "tese-redacao" | "tese_redacao" => ActivityKind::TeseRedacao,
            _ => ActivityKind::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::QuadroInterativo => "quadro-interativo",
            ActivityKind::Quiz => "quiz-interativo",
            ActivityKind::FlashCards => "flash-cards",
            ActivityKind::TeseRedacao => "tese-redacao",
            ActivityKind::Generic => "generic",
        }
    }

    /// Whether artifacts of this kind are large enough that the lightweight
    /// metadata key stores a count instead of the content.
    pub fn is_content_heavy(&self) -> bool {
        matches!(
            self,
            ActivityKind::QuadroInterativo | ActivityKind::Quiz | ActivityKind::FlashCards
        )
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work representing one educational artifact to be generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructionActivity {
    pub id: ActivityId,
    pub title: String,
    pub description: String,
    /// Declared type, used for strategy dispatch.
    #[serde(rename = "type")]
    pub activity_type: String,
    #[serde(default)]
    pub custom_fields: FieldMap,
    #[serde(default)]
    pub status: ActivityStatus,
    /// Progress percentage, 0-100.
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub is_built: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_at: Option<DateTime<Utc>>,
}

impl ConstructionActivity {
    /// Create a pending activity.
    pub fn new(
        id: impl Into<ActivityId>,
        title: impl Into<String>,
        description: impl Into<String>,
        activity_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            activity_type: activity_type.into(),
            custom_fields: FieldMap::new(),
            status: ActivityStatus::Pending,
            progress: 0,
            is_built: false,
            built_at: None,
        }
    }

    /// Add a custom field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_fields.insert(key.into(), value.into());
        self
    }

    /// Replace the custom field map.
    pub fn with_fields(mut self, fields: FieldMap) -> Self {
        self.custom_fields = fields;
        self
    }

    pub fn kind(&self) -> ActivityKind {
        ActivityKind::from_declared(&self.activity_type)
    }

    /// Number of custom fields holding a non-blank value.
    pub fn populated_field_count(&self) -> usize {
        self.custom_fields
            .values()
            .filter(|v| !v.trim().is_empty())
            .count()
    }

    /// Names of the required descriptive fields that are blank.
    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.title.trim().is_empty() {
            missing.push("title");
        }
        if self.description.trim().is_empty() {
            missing.push("description");
        }
        missing
    }

    /// Already built upstream, so the queue should skip it.
    pub fn is_already_built(&self) -> bool {
        self.is_built || self.status == ActivityStatus::Completed
    }

    pub fn mark_in_progress(&mut self, progress: u8) {
        self.status = ActivityStatus::InProgress;
        self.progress = progress.min(100);
    }

    pub fn mark_built(&mut self, at: DateTime<Utc>) {
        self.status = ActivityStatus::Completed;
        self.progress = 100;
        self.is_built = true;
        self.built_at = Some(at);
    }

    pub fn mark_error(&mut self) {
        self.status = ActivityStatus::Error;
        self.progress = 0;
    }
}
