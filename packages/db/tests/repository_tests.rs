#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::time::Duration;

use build_core::{PersistenceAdapter, PersistenceError};
use db::DbError;

use common::{new_artifact, setup_repository};

#[tokio::test]
async fn test_create_and_get() -> Result<(), Box<dyn Error>> {
    let repo = setup_repository().await?;

    let created = repo.create(&new_artifact("prof-1", "quiz-interativo-q1")).await?;
    assert_eq!(created.owner_id, "prof-1");
    assert_eq!(created.unique_code, "quiz-interativo-q1");
    assert!(!created.id.is_empty());

    let loaded = repo.get(&created.id).await?;
    assert_eq!(loaded.id, created.id);
    assert_eq!(loaded.title, "Frações");
    assert_eq!(loaded.content["questions"][0]["options"][0], "3/4");
    assert_eq!(loaded.created_at, created.created_at);

    let by_code = repo.find_by_code("quiz-interativo-q1").await?;
    assert_eq!(by_code.map(|a| a.id), Some(created.id.clone()));
    assert!(repo.find_by_code("missing").await?.is_none());

    repo.delete(&created.id).await?;
    assert!(matches!(repo.get(&created.id).await, Err(DbError::NotFound(_))));
    assert!(!repo.code_exists("quiz-interativo-q1").await?);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_code_is_rejected() -> Result<(), Box<dyn Error>> {
    let repo = setup_repository().await?;

    repo.create(&new_artifact("prof-1", "quiz-interativo-q1")).await?;
    assert!(repo.code_exists("quiz-interativo-q1").await?);

    let err = repo
        .create(&new_artifact("prof-2", "quiz-interativo-q1"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Duplicate(ref code) if code == "quiz-interativo-q1"));

    let err = repo
        .create_artifact(new_artifact("prof-1", "quiz-interativo-q1"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PersistenceError::Duplicate("quiz-interativo-q1".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn test_list_is_per_owner_in_creation_order() -> Result<(), Box<dyn Error>> {
    let repo = setup_repository().await?;

    for code in ["a-3", "a-1", "a-2"] {
        repo.create_artifact(new_artifact("prof-1", code)).await?;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    repo.create_artifact(new_artifact("prof-2", "b-1")).await?;

    let listed = repo.list_artifacts("prof-1").await?;
    let codes: Vec<_> = listed.iter().map(|a| a.unique_code.as_str()).collect();
    assert_eq!(codes, vec!["a-3", "a-1", "a-2"]);

    let other = repo.list_by_owner("prof-2").await?;
    assert_eq!(other.len(), 1);
    assert!(repo.list_by_owner("nobody").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_databases_are_isolated() -> Result<(), Box<dyn Error>> {
    let first = setup_repository().await?;
    let second = setup_repository().await?;

    first.create(&new_artifact("prof-1", "quiz-interativo-q1")).await?;
    assert!(second.list_by_owner("prof-1").await?.is_empty());
    second.create(&new_artifact("prof-1", "quiz-interativo-q1")).await?;
    Ok(())
}
