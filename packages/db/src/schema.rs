//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// Safe to run on every start; every definition is `IF NOT EXISTS`.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(ARTIFACT_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Artifact table schema.
const ARTIFACT_SCHEMA: &str = r#"
-- Finished artifacts forwarded by the build pipeline
DEFINE TABLE IF NOT EXISTS artifact SCHEMALESS;

DEFINE FIELD IF NOT EXISTS owner_id ON artifact TYPE string;
DEFINE FIELD IF NOT EXISTS unique_code ON artifact TYPE string;
DEFINE FIELD IF NOT EXISTS activity_type ON artifact TYPE string;
DEFINE FIELD IF NOT EXISTS title ON artifact TYPE string;
DEFINE FIELD IF NOT EXISTS description ON artifact TYPE string;
-- RFC 3339 with fixed precision so lexical order is creation order
DEFINE FIELD IF NOT EXISTS created_at ON artifact TYPE string;

DEFINE INDEX IF NOT EXISTS artifact_code ON artifact FIELDS unique_code UNIQUE;
DEFINE INDEX IF NOT EXISTS artifact_owner ON artifact FIELDS owner_id, created_at;
"#;
