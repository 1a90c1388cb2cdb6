//! Capabilities the pipeline persists artifacts through.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PersistenceError, StoreError};

/// Boxed future returned by the capability traits.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Key-value store holding the artifact key scheme.
pub trait ArtifactStore: Send + Sync + 'static {
    /// Write a JSON value under a key, replacing any previous value.
    fn put<'a>(
        &'a self,
        key: &'a str,
        value: serde_json::Value,
    ) -> StoreFuture<'a, Result<(), StoreError>>;

    /// Read the JSON value under a key; `None` when absent.
    fn get<'a>(&'a self, key: &'a str)
    -> StoreFuture<'a, Result<Option<serde_json::Value>, StoreError>>;
}

/// A finished artifact handed to the external repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArtifact {
    pub owner_id: String,
    /// Uniqueness is enforced by the adapter.
    pub unique_code: String,
    pub activity_type: String,
    pub title: String,
    pub description: String,
    pub content: serde_json::Value,
}

/// An artifact as stored by the external repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub owner_id: String,
    pub unique_code: String,
    pub activity_type: String,
    pub title: String,
    pub description: String,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// External repository receiving finished artifacts.
pub trait PersistenceAdapter: Send + Sync + 'static {
    fn create_artifact(
        &self,
        artifact: NewArtifact,
    ) -> StoreFuture<'_, Result<Artifact, PersistenceError>>;

    /// Artifacts of one owner, oldest first.
    fn list_artifacts<'a>(
        &'a self,
        owner_id: &'a str,
    ) -> StoreFuture<'a, Result<Vec<Artifact>, PersistenceError>>;
}
