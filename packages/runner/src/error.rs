use thiserror::Error;

/// Errors that stop the runner before or while it drives the queue.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to read jobs file {path}: {source}")]
    Jobs {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid jobs JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] storage::StorageError),

    #[error(transparent)]
    Database(#[from] db::DbError),

    #[error("Failed to start build actor: {0}")]
    Actor(#[from] orchestrator::SpawnErr),

    #[error(transparent)]
    Queue(#[from] build_core::QueueError),
}
