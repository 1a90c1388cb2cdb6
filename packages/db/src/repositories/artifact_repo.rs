//! Artifact repository backing the pipeline's persistence adapter.

use build_core::{Artifact, NewArtifact, PersistenceAdapter, PersistenceError, StoreFuture};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use ulid::Ulid;

use crate::{Database, DbError};

const TABLE: &str = "artifact";

/// Repository for artifact persistence operations.
#[derive(Debug, Clone)]
pub struct ArtifactRepository {
    db: Database,
}

/// Struct for creating artifacts; the record id is supplied separately.
#[derive(Debug, Clone, Serialize)]
struct ArtifactCreate {
    owner_id: String,
    unique_code: String,
    activity_type: String,
    title: String,
    description: String,
    content: serde_json::Value,
    created_at: String,
}

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct ArtifactRecord {
    id: Thing,
    owner_id: String,
    unique_code: String,
    activity_type: String,
    title: String,
    description: String,
    #[serde(default)]
    content: serde_json::Value,
    created_at: String,
}

impl ArtifactRecord {
    fn into_artifact(self) -> Result<Artifact, DbError> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| DbError::Serialization(format!("created_at: {e}")))?
            .with_timezone(&Utc);
        Ok(Artifact {
            id: self.id.id.to_raw(),
            owner_id: self.owner_id,
            unique_code: self.unique_code,
            activity_type: self.activity_type,
            title: self.title,
            description: self.description,
            content: self.content,
            created_at,
        })
    }
}

#[derive(Deserialize)]
struct CountResult {
    count: i64,
}

impl ArtifactRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a new artifact. Unique codes may only be used once.
    pub async fn create(&self, artifact: &NewArtifact) -> Result<Artifact, DbError> {
        if self.code_exists(&artifact.unique_code).await? {
            return Err(DbError::Duplicate(artifact.unique_code.clone()));
        }

        let id = Ulid::new().to_string();
        let create_data = ArtifactCreate {
            owner_id: artifact.owner_id.clone(),
            unique_code: artifact.unique_code.clone(),
            activity_type: artifact.activity_type.clone(),
            title: artifact.title.clone(),
            description: artifact.description.clone(),
            content: artifact.content.clone(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        };

        let record: Option<ArtifactRecord> = self
            .db
            .create((TABLE, id.as_str()))
            .content(create_data)
            .await
            .map_err(|e| {
                // Lost a race against a concurrent insert of the same code.
                if e.to_string().contains("already contains") {
                    DbError::Duplicate(artifact.unique_code.clone())
                } else {
                    DbError::Connection(e)
                }
            })?;

        let artifact = record
            .ok_or_else(|| DbError::Query("Failed to create artifact".into()))?
            .into_artifact()?;
        tracing::debug!("Stored artifact {} ({})", artifact.id, artifact.unique_code);
        Ok(artifact)
    }

    /// Get an artifact by ID.
    pub async fn get(&self, id: &str) -> Result<Artifact, DbError> {
        let record: Option<ArtifactRecord> = self.db.select((TABLE, id)).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Artifact not found: {}", id)))?
            .into_artifact()
    }

    pub async fn find_by_code(&self, unique_code: &str) -> Result<Option<Artifact>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM artifact WHERE unique_code = $code LIMIT 1")
            .bind(("code", unique_code.to_string()))
            .await?;

        let records: Vec<ArtifactRecord> = result.take(0)?;
        records
            .into_iter()
            .next()
            .map(ArtifactRecord::into_artifact)
            .transpose()
    }

    /// Artifacts of one owner, oldest first.
    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Artifact>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM artifact WHERE owner_id = $owner_id ORDER BY created_at ASC")
            .bind(("owner_id", owner_id.to_string()))
            .await?;

        let records: Vec<ArtifactRecord> = result.take(0)?;
        records
            .into_iter()
            .map(ArtifactRecord::into_artifact)
            .collect()
    }

    /// Delete an artifact.
    pub async fn delete(&self, id: &str) -> Result<(), DbError> {
        let _: Option<ArtifactRecord> = self.db.delete((TABLE, id)).await?;
        Ok(())
    }

    /// Check if a unique code is taken.
    pub async fn code_exists(&self, unique_code: &str) -> Result<bool, DbError> {
        let mut result = self
            .db
            .query("SELECT count() FROM artifact WHERE unique_code = $code GROUP ALL")
            .bind(("code", unique_code.to_string()))
            .await?;

        let counts: Vec<CountResult> = result.take(0)?;

        Ok(counts.first().is_some_and(|c| c.count > 0))
    }
}

impl From<DbError> for PersistenceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Duplicate(code) => PersistenceError::Duplicate(code),
            other => PersistenceError::Backend(other.to_string()),
        }
    }
}

impl PersistenceAdapter for ArtifactRepository {
    fn create_artifact(
        &self,
        artifact: NewArtifact,
    ) -> StoreFuture<'_, Result<Artifact, PersistenceError>> {
        Box::pin(async move { Ok(self.create(&artifact).await?) })
    }

    fn list_artifacts<'a>(
        &'a self,
        owner_id: &'a str,
    ) -> StoreFuture<'a, Result<Vec<Artifact>, PersistenceError>> {
        Box::pin(async move { Ok(self.list_by_owner(owner_id).await?) })
    }
}
