//! Core domain types for the activity build pipeline.
//!
//! This crate contains shared types used across all packages:
//! - ConstructionActivity and ActivityKind for work items
//! - QueuedItem, QueueProgress and QueueSummary for queue runs
//! - BuildEvent and its payloads for the event bus
//! - The artifact key scheme and the store/persistence capabilities

mod activity;
mod artifact;
mod error;
mod events;
mod queue;
mod store;

pub use activity::{ActivityId, ActivityKind, ActivityStatus, ConstructionActivity, FieldMap};
pub use artifact::{
    ActivityMetadata, ArtifactEnvelope, BuildStrategy, CONSTRUCTED_INDEX_KEY, ConstructedEntry,
    ConstructedIndex, MetadataBody, activity_key, constructed_key, index_entry_label,
};
pub use error::{BuildError, PersistenceError, QueueError, StoreError};
pub use events::{
    BuildEvent, BuildPhase, BuildProgress, BuildRequest, BuildResult, EventName, RequestId,
};
pub use queue::{
    ItemBuildStatus, OutcomeCounts, QueueConfig, QueueProgress, QueueStatus, QueueSummary,
    QueuedItem,
};
pub use store::{Artifact, ArtifactStore, NewArtifact, PersistenceAdapter, StoreFuture};
