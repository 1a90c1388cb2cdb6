//! Persisted artifact key scheme and envelopes.
//!
//! Every successful build writes three records:
//! - `constructed_{type}_{id}`: the full generation envelope
//! - `activity_{id}`: lightweight metadata (a count instead of the content for heavy kinds)
//! - `constructedActivities`: one global map keyed by activity id

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ActivityId, ActivityKind, FieldMap};

/// Key of the global id-keyed map of built activities.
pub const CONSTRUCTED_INDEX_KEY: &str = "constructedActivities";

/// Key of the full envelope for one activity.
pub fn constructed_key(activity_type: &str, id: &ActivityId) -> String {
    format!("constructed_{}_{}", activity_type, id)
}

/// Key of the lightweight metadata record for one activity.
pub fn activity_key(id: &ActivityId) -> String {
    format!("activity_{}", id)
}

/// Diagnostic label for an entry inside the global map.
pub fn index_entry_label(id: &ActivityId) -> String {
    format!("{}[{}]", CONSTRUCTED_INDEX_KEY, id)
}

/// How an artifact was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStrategy {
    Pregenerated,
    Generator,
    Bridge,
    Fallback,
}

impl BuildStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStrategy::Pregenerated => "pregenerated",
            BuildStrategy::Generator => "generator",
            BuildStrategy::Bridge => "bridge",
            BuildStrategy::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for BuildStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full generation envelope stored under [`constructed_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactEnvelope {
    pub success: bool,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_placeholder: bool,
    pub strategy: BuildStrategy,
}

impl ArtifactEnvelope {
    pub fn new(data: serde_json::Value, strategy: BuildStrategy) -> Self {
        Self {
            success: true,
            data,
            timestamp: Utc::now(),
            is_placeholder: strategy == BuildStrategy::Fallback,
            strategy,
        }
    }
}

/// Either the inline content or, for heavy kinds, the number of items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetadataBody {
    ItemCount(usize),
    Content(serde_json::Value),
}

/// Lightweight record stored under [`activity_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMetadata {
    pub title: String,
    #[serde(rename = "type")]
    pub activity_type: String,
    pub generated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: MetadataBody,
}

impl ActivityMetadata {
    /// Build metadata for an artifact, keeping only a count for content-heavy kinds.
    pub fn describe(
        title: impl Into<String>,
        activity_type: impl Into<String>,
        kind: ActivityKind,
        data: &serde_json::Value,
        item_count: usize,
    ) -> Self {
        let body = if kind.is_content_heavy() {
            MetadataBody::ItemCount(item_count)
        } else {
            MetadataBody::Content(data.clone())
        };
        Self {
            title: title.into(),
            activity_type: activity_type.into(),
            generated_at: Utc::now(),
            body,
        }
    }
}

/// Entry of the global map stored under [`CONSTRUCTED_INDEX_KEY`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructedEntry {
    pub is_built: bool,
    pub built_at: DateTime<Utc>,
    pub form_data: FieldMap,
    pub generated_content: serde_json::Value,
}

/// The global map as stored.
pub type ConstructedIndex = BTreeMap<ActivityId, ConstructedEntry>;
