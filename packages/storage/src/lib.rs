//! Artifact key-value store backed by `object_store`.
//!
//! - On-disk storage for local runs
//! - In-memory storage for tests and throwaway runs
//!
//! Every artifact key maps to one JSON object at `<prefix>/<key>.json`.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use build_core::{ArtifactStore, StoreError, StoreFuture};
use bytes::Bytes;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("invalid artifact key: {0:?}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey(key) => StoreError::InvalidKey(key),
            StorageError::Json(err) => StoreError::Serialization(err),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Optional prefix applied to all artifact paths.
    pub prefix: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = non_empty(prefix.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `STORAGE_BACKEND`: `memory` (default) or `filesystem`
    /// - `STORAGE_FS_ROOT`: filesystem root (default: `./data/artifacts`)
    /// - `STORAGE_PREFIX`: optional path prefix, e.g. `constructed/`
    pub fn from_env() -> Result<Self, StorageError> {
        let backend = std::env::var("STORAGE_BACKEND").ok().and_then(non_empty);
        let prefix = std::env::var("STORAGE_PREFIX").ok().and_then(non_empty);

        let cfg = match backend.as_deref() {
            Some("filesystem") | Some("fs") => {
                let root = std::env::var("STORAGE_FS_ROOT")
                    .ok()
                    .and_then(non_empty)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/artifacts"));
                Self::filesystem(root)
            }
            Some("memory") | Some("mem") | None => Self::memory(),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected filesystem|memory)"
                )));
            }
        };

        Ok(Self { prefix, ..cfg })
    }
}

#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl Storage {
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn kind_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, store) = match cfg.backend {
            StorageBackendConfig::Filesystem { root } => {
                ensure_dir(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StorageKind::Filesystem, Arc::new(fs) as Arc<dyn ObjectStore>)
            }
            StorageBackendConfig::Memory => {
                let mem = object_store::memory::InMemory::new();
                (StorageKind::Memory, Arc::new(mem) as Arc<dyn ObjectStore>)
            }
        };

        Ok(Self {
            kind,
            store,
            prefix: cfg.prefix.and_then(non_empty),
        })
    }

    pub fn memory() -> Self {
        Self {
            kind: StorageKind::Memory,
            store: Arc::new(object_store::memory::InMemory::new()),
            prefix: None,
        }
    }

    pub fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?)
    }

    fn to_path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        let joined = match self.prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{key}.json"),
            _ => format!("{key}.json"),
        };

        Ok(Path::from(joined))
    }

    pub async fn put_json_value(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        self.store
            .put(&path, object_store::PutPayload::from(bytes))
            .await?;
        Ok(())
    }

    /// Read the value under `key`; `None` when nothing was written there.
    pub async fn get_json_value(
        &self,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StorageError> {
        let path = self.to_path(key)?;
        let res = match self.store.get(&path).await {
            Ok(res) => res,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let bytes = res.bytes().await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl ArtifactStore for Storage {
    fn put<'a>(
        &'a self,
        key: &'a str,
        value: serde_json::Value,
    ) -> StoreFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.put_json_value(key, &value).await?;
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> StoreFuture<'a, Result<Option<serde_json::Value>, StoreError>> {
        Box::pin(async move { Ok(self.get_json_value(key).await?) })
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("kind", &self.kind)
            .field("prefix", &self.prefix)
            .finish()
    }
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use build_core::{ActivityId, CONSTRUCTED_INDEX_KEY, constructed_key};
    use serde_json::json;

    #[tokio::test]
    async fn missing_keys_read_as_none() -> Result<(), StorageError> {
        let storage = Storage::memory();
        assert_eq!(storage.get_json_value("activity_nothing").await?, None);
        storage.delete("activity_nothing").await?;
        Ok(())
    }

    #[tokio::test]
    async fn filesystem_backend_persists_artifact_keys() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let storage =
            Storage::new(StorageConfig::filesystem(dir.path()).with_prefix("constructed/"))?;

        let key = constructed_key("quiz-interativo", &ActivityId::new("q1"));
        let value = json!({"success": true, "data": {"questions": []}});
        storage.put_json_value(&key, &value).await?;
        assert_eq!(storage.get_json_value(&key).await?, Some(value));
        assert!(
            dir.path()
                .join("constructed")
                .join(format!("{key}.json"))
                .exists()
        );
        Ok(())
    }

    #[tokio::test]
    async fn store_trait_overwrites_previous_value() -> Result<(), StoreError> {
        let storage = Storage::memory();
        let store: &dyn ArtifactStore = &storage;
        store.put(CONSTRUCTED_INDEX_KEY, json!({"a": 1})).await?;
        store.put(CONSTRUCTED_INDEX_KEY, json!({"b": 2})).await?;
        assert_eq!(store.get(CONSTRUCTED_INDEX_KEY).await?, Some(json!({"b": 2})));
        Ok(())
    }

    #[tokio::test]
    async fn empty_keys_are_rejected() {
        let storage = Storage::memory();
        let err = ArtifactStore::put(&storage, "/", json!(null)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[test]
    fn blank_prefix_is_ignored() {
        let cfg = StorageConfig::memory().with_prefix("  ");
        assert!(cfg.prefix.is_none());
    }
}
