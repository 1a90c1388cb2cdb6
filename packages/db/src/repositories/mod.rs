//! Repository implementations for database operations.

mod artifact_repo;

pub use artifact_repo::ArtifactRepository;
