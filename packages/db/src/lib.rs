//! SurrealDB persistence for finished artifacts.
//!
//! This crate provides the database connection and the repository the
//! build pipeline forwards finished artifacts to.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use repositories::ArtifactRepository;
pub use schema::init_schema;

/// Connect and make sure the schema exists.
pub async fn init(config: &DbConfig) -> Result<Database, DbError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}
