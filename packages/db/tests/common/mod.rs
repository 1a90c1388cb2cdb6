use build_core::NewArtifact;
use serde_json::json;

use db::{ArtifactRepository, DbConfig, DbError};

/// Fresh in-memory database per test; every `mem://` connection is isolated.
pub async fn setup_repository() -> Result<ArtifactRepository, DbError> {
    let db = db::init(&DbConfig::memory()).await?;
    Ok(ArtifactRepository::new(db))
}

pub fn new_artifact(owner_id: &str, unique_code: &str) -> NewArtifact {
    NewArtifact {
        owner_id: owner_id.to_string(),
        unique_code: unique_code.to_string(),
        activity_type: "quiz-interativo".to_string(),
        title: "Frações".to_string(),
        description: "Quiz sobre frações".to_string(),
        content: json!({
            "questions": [{"question": "1/2 + 1/4?", "options": ["3/4", "2/6"]}],
        }),
    }
}
